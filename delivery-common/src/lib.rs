//! Shared core of the message delivery engine: the data model, the
//! backoff policy, the channel registry and its handlers, the job store
//! contract and its Postgres adapter, and the queue service facade that
//! every binary in the workspace talks through.

pub mod backoff;
pub mod channel;
pub mod channels;
pub mod error;
pub mod health;
pub mod message;
pub mod metrics;
pub mod pg_store;
pub mod queue_service;
pub mod store;

pub use channel::{ChannelHandler, ChannelRegistry};
pub use error::{DeliveryError, QueueServiceError, StoreError};
pub use message::{Channel, InvalidMessage, JobQueue, JobRecord, JobState, Message};
pub use pg_store::PgJobStore;
pub use queue_service::QueueService;
pub use store::{Counts, JobStore};
