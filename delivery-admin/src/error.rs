use delivery_common::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdminError {
    #[error("the job store is unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("http server error: {0}")]
    Server(#[from] std::io::Error),
}
