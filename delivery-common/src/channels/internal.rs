//! The internal-service channel: an in-process routine invocation,
//! deterministic so that tests can inject arbitrary success/failure
//! sequences.

use std::sync::Arc;

use async_trait::async_trait;

use crate::channel::ChannelHandler;
use crate::error::DeliveryError;
use crate::message::Message;

/// The routine an `InternalHandler` dispatches to. Production code wires
/// in whatever in-process service the deployment needs; tests wire in a
/// routine that fails a fixed number of times before succeeding.
#[async_trait]
pub trait InternalRoutine: Send + Sync {
    async fn invoke(&self, message: &Message) -> Result<(), DeliveryError>;
}

/// A routine that always succeeds — the default when no routine is
/// configured.
pub struct AlwaysSucceeds;

#[async_trait]
impl InternalRoutine for AlwaysSucceeds {
    async fn invoke(&self, _message: &Message) -> Result<(), DeliveryError> {
        Ok(())
    }
}

pub struct InternalHandler {
    routine: Arc<dyn InternalRoutine>,
}

impl InternalHandler {
    pub fn new(routine: Arc<dyn InternalRoutine>) -> Self {
        Self { routine }
    }
}

impl Default for InternalHandler {
    fn default() -> Self {
        Self::new(Arc::new(AlwaysSucceeds))
    }
}

#[async_trait]
impl ChannelHandler for InternalHandler {
    async fn deliver(&self, message: &Message) -> Result<(), DeliveryError> {
        self.routine.invoke(message).await
    }
}
