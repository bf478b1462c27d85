use delivery_common::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JanitorError {
    #[error("the job store is unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
    #[error("failed to construct the email alert handler: {0}")]
    EmailHandlerInit(#[source] delivery_common::DeliveryError),
}
