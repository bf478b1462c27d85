//! Concrete `ChannelHandler` implementations for the three closed
//! channels: HTTP webhooks, outbound email, and in-process routines.

pub mod email;
pub mod http;
pub mod internal;

pub use email::{EmailHandler, SmtpConfig};
pub use http::HttpWebhookHandler;
pub use internal::{InternalHandler, InternalRoutine};
