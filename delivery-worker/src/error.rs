use delivery_common::StoreError;
use thiserror::Error;

/// Enumeration of errors that can abort the worker's run loop entirely.
/// Per-job failures never reach here; they are resolved into a store
/// transition (`complete`, `fail`, or `move_to_dead_letter`) instead.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("the job store is unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
    #[error("failed to construct the email channel handler: {0}")]
    EmailHandlerInit(#[source] delivery_common::DeliveryError),
}
