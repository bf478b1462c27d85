//! Email delivery handler, built on `lettre`'s async SMTP transport.

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{message::MultiPart, AsyncSmtpTransport, AsyncTransport, Message as LettreMessage, Tokio1Executor};
use serde::Deserialize;

use crate::channel::ChannelHandler;
use crate::error::DeliveryError;
use crate::message::Message;

const DEFAULT_SUBJECT: &str = "Message Notification";

/// SMTP connection settings for the email handler.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub default_from: String,
}

/// Channel-specific shape of `Message::data` for the email channel:
/// `{from?, fromName?, subject?, text?, html?}`.
#[derive(Debug, Deserialize, Default)]
struct EmailData {
    from: Option<String>,
    #[serde(rename = "fromName")]
    from_name: Option<String>,
    subject: Option<String>,
    text: Option<String>,
    html: Option<String>,
}

pub struct EmailHandler {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    default_from: String,
}

impl EmailHandler {
    pub fn new(config: SmtpConfig) -> Result<Self, DeliveryError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| DeliveryError::Connection(e.to_string()))?
            .port(config.port);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            default_from: config.default_from,
        })
    }
}

#[async_trait]
impl ChannelHandler for EmailHandler {
    async fn deliver(&self, message: &Message) -> Result<(), DeliveryError> {
        let data: EmailData = serde_json::from_value(message.data.clone())
            .map_err(|e| DeliveryError::Parse(e.to_string()))?;

        let from = data.from.as_deref().unwrap_or(&self.default_from);
        let from_mailbox = format_mailbox(from, data.from_name.as_deref())
            .parse()
            .map_err(|e: lettre::address::AddressError| DeliveryError::Parse(e.to_string()))?;
        let to_mailbox = message
            .destination
            .parse()
            .map_err(|e: lettre::address::AddressError| DeliveryError::Parse(e.to_string()))?;

        let subject = data.subject.as_deref().unwrap_or(DEFAULT_SUBJECT);

        let body = match (&data.html, &data.text) {
            (Some(html), Some(text)) => {
                MultiPart::alternative_plain_html(text.clone(), html.clone())
            }
            (Some(html), None) => MultiPart::alternative_plain_html(String::new(), html.clone()),
            (None, Some(text)) => MultiPart::alternative_plain_html(text.clone(), String::new()),
            (None, None) => MultiPart::alternative_plain_html(String::new(), String::new()),
        };

        let email = LettreMessage::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(subject)
            .multipart(body)
            .map_err(|e| DeliveryError::Parse(e.to_string()))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| DeliveryError::Connection(e.to_string()))?;

        Ok(())
    }
}

fn format_mailbox(address: &str, display_name: Option<&str>) -> String {
    match display_name {
        Some(name) => format!("{name} <{address}>"),
        None => address.to_owned(),
    }
}
