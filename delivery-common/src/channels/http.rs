//! HTTP webhook delivery handler.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header;
use serde::Serialize;

use crate::channel::ChannelHandler;
use crate::error::DeliveryError;
use crate::message::Message;

#[derive(Serialize)]
struct WebhookBody<'a> {
    id: &'a str,
    data: &'a serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: &'a Option<serde_json::Value>,
}

/// POSTs `{id, data, metadata}` as JSON to `message.destination`.
/// Success is any response status in `[200, 300)`; anything else,
/// including a transport-level failure, is a transient `DeliveryError`.
pub struct HttpWebhookHandler {
    client: reqwest::Client,
}

impl HttpWebhookHandler {
    pub fn new(request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent("message-delivery-worker")
            .build()
            .expect("failed to construct reqwest client for the http webhook handler");

        Self { client }
    }
}

#[async_trait]
impl ChannelHandler for HttpWebhookHandler {
    async fn deliver(&self, message: &Message) -> Result<(), DeliveryError> {
        let body = WebhookBody {
            id: &message.id,
            data: &message.data,
            metadata: &message.metadata,
        };

        let response = self
            .client
            .post(&message.destination)
            .header(header::CONTENT_TYPE, "application/json")
            .header("X-Message-Id", message.id.as_str())
            .json(&body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::BadStatus {
                status: status.as_u16(),
                message: status
                    .canonical_reason()
                    .unwrap_or("unknown status")
                    .to_owned(),
            })
        }
    }
}

fn classify_transport_error(error: reqwest::Error) -> DeliveryError {
    if error.is_timeout() {
        DeliveryError::Timeout(error.to_string())
    } else {
        DeliveryError::Connection(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_timeouts_separately_from_connection_errors() {
        // reqwest::Error cannot be constructed directly in tests without a
        // live request; exercised end-to-end in worker integration tests
        // instead. This test only documents the intended mapping.
        assert_eq!(
            DeliveryError::Timeout("x".into()).to_string(),
            "delivery timed out: x"
        );
    }
}
