//! The channel registry: resolves a `Channel` to a `ChannelHandler` and
//! dispatches delivery through it. Handlers are the only place that
//! performs outbound I/O.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::DeliveryError;
use crate::message::{Channel, Message};

/// A single delivery mechanism. Implementors perform the outbound I/O and
/// translate transport-specific failures into `DeliveryError`.
#[async_trait]
pub trait ChannelHandler: Send + Sync {
    async fn deliver(&self, message: &Message) -> Result<(), DeliveryError>;
}

/// Resolves channel kinds to handlers. The channel set is closed (three
/// variants), so a `HashMap` keyed by `Channel` is all the indirection
/// this needs — no open-ended plugin discovery.
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    handlers: HashMap<Channel, Arc<dyn ChannelHandler>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(mut self, channel: Channel, handler: Arc<dyn ChannelHandler>) -> Self {
        self.handlers.insert(channel, handler);
        self
    }

    /// Returns the handler for `channel`, or `DeliveryError::UnknownChannel`
    /// if none is registered.
    pub fn resolve(&self, channel: Channel) -> Result<Arc<dyn ChannelHandler>, DeliveryError> {
        self.handlers
            .get(&channel)
            .cloned()
            .ok_or_else(|| DeliveryError::UnknownChannel(channel.to_string()))
    }

    /// Convenience: resolve then invoke.
    pub async fn deliver(&self, message: &Message) -> Result<(), DeliveryError> {
        let handler = self.resolve(message.channel)?;
        handler.deliver(message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl ChannelHandler for CountingHandler {
        async fn deliver(&self, _message: &Message) -> Result<(), DeliveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(DeliveryError::Connection("boom".to_owned()))
            } else {
                Ok(())
            }
        }
    }

    fn sample_message(channel: Channel) -> Message {
        Message {
            id: "m1".to_owned(),
            channel,
            destination: "dest".to_owned(),
            data: serde_json::json!({}),
            metadata: None,
        }
    }

    #[tokio::test]
    async fn resolve_fails_for_unregistered_channel() {
        let registry = ChannelRegistry::new();
        let err = registry.resolve(Channel::Http).unwrap_err();
        assert!(err.is_terminal());
    }

    #[tokio::test]
    async fn deliver_dispatches_to_the_registered_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = ChannelRegistry::new().register(
            Channel::Internal,
            Arc::new(CountingHandler {
                calls: calls.clone(),
                fail: false,
            }),
        );

        registry
            .deliver(&sample_message(Channel::Internal))
            .await
            .expect("delivery should succeed");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn deliver_propagates_transient_handler_errors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = ChannelRegistry::new().register(
            Channel::Internal,
            Arc::new(CountingHandler { calls, fail: true }),
        );

        let err = registry
            .deliver(&sample_message(Channel::Internal))
            .await
            .unwrap_err();
        assert!(!err.is_terminal());
    }
}
