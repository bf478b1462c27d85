//! Error taxonomy shared between the job store adapter, the channel
//! registry, and the queue service facade.

use thiserror::Error;

use crate::message::JobState;

/// Errors surfaced by the job store adapter.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("connection to the job store failed: {0}")]
    ConnectionError(#[source] sqlx::Error),
    #[error("{command} query failed: {error}")]
    QueryError {
        command: &'static str,
        #[source]
        error: sqlx::Error,
    },
    #[error("job {0} was not found")]
    NotFound(i64),
}

impl StoreError {
    /// Whether this failure means the backing store is unreachable, as
    /// opposed to a well-formed "no such row" result. Callers treat the
    /// former as `StoreUnavailable` and back off; the latter is an
    /// ordinary negative result.
    pub fn is_unavailable(&self) -> bool {
        !matches!(self, StoreError::NotFound(_))
    }
}

/// Errors surfaced by `ChannelRegistry::resolve`/`deliver`.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("{0} has no registered delivery handler")]
    UnknownChannel(String),
    #[error("delivery timed out: {0}")]
    Timeout(String),
    #[error("delivery failed with status {status}: {message}")]
    BadStatus { status: u16, message: String },
    #[error("delivery transport error: {0}")]
    Connection(String),
    #[error("could not parse a delivery parameter: {0}")]
    Parse(String),
}

impl DeliveryError {
    /// Every handler error is transient except `UnknownChannel`, which
    /// is terminal on first occurrence.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryError::UnknownChannel(_))
    }
}

/// Errors surfaced by the queue service facade, the public contract the
/// worker, janitor, and admin binaries all depend on.
#[derive(Error, Debug)]
pub enum QueueServiceError {
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    #[error("job not found")]
    NotFound,
    #[error("job is in state {0} and cannot be requeued")]
    NotRequeueable(JobState),
    #[error("the job store is unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

impl From<crate::message::InvalidMessage> for QueueServiceError {
    fn from(value: crate::message::InvalidMessage) -> Self {
        QueueServiceError::InvalidMessage(value.to_string())
    }
}

impl From<crate::message::UnknownChannelName> for QueueServiceError {
    fn from(value: crate::message::UnknownChannelName) -> Self {
        QueueServiceError::InvalidMessage(value.to_string())
    }
}
