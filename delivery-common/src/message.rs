//! Data model shared by every component of the delivery engine: the
//! producer-facing `Message`, and the `JobRecord` the job store owns.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The delivery mechanism a `Message` is routed through.
///
/// The channel set is closed: there is no plugin mechanism for adding a
/// fourth variant at runtime, so a plain enum (rather than an open trait
/// registry) is the right shape here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Http,
    Email,
    Internal,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Channel::Http => write!(f, "http"),
            Channel::Email => write!(f, "email"),
            Channel::Internal => write!(f, "internal"),
        }
    }
}

/// Error returned when a raw string does not name a known channel.
#[derive(Debug, thiserror::Error)]
#[error("{0} is not a known delivery channel")]
pub struct UnknownChannelName(pub String);

impl FromStr for Channel {
    type Err = UnknownChannelName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Channel::Http),
            "email" => Ok(Channel::Email),
            "internal" => Ok(Channel::Internal),
            other => Err(UnknownChannelName(other.to_owned())),
        }
    }
}

/// The payload submitted by a producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Producer-supplied external identifier, used for correlation. Not
    /// required to be unique by the core.
    pub id: String,
    pub channel: Channel,
    /// Channel-specific address: a URL, an email address, a service name.
    pub destination: String,
    /// Opaque, channel-specific content.
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Error returned by `Message::validate`.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum InvalidMessage {
    #[error("message id must not be empty")]
    EmptyId,
    #[error("destination must not be empty")]
    EmptyDestination,
}

impl Message {
    /// Checks the invariants required at submission time: non-empty id
    /// and destination. Unknown channel values are rejected
    /// earlier, by `Channel::from_str`, since `Channel` can only hold a
    /// known variant once constructed.
    pub fn validate(&self) -> Result<(), InvalidMessage> {
        if self.id.is_empty() {
            return Err(InvalidMessage::EmptyId);
        }
        if self.destination.is_empty() {
            return Err(InvalidMessage::EmptyDestination);
        }
        Ok(())
    }
}

/// One of the two logical queues the job store maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobQueue {
    Main,
    DeadLetter,
}

impl JobQueue {
    /// The logical queue name used at the store boundary.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobQueue::Main => "message-delivery",
            JobQueue::DeadLetter => "message-delivery-dead-letter",
        }
    }
}

impl fmt::Display for JobQueue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The lifecycle state of a `JobRecord`.
///
/// `DeadLettered` is never persisted by the store: the physical
/// dead-letter record's state is `Waiting` (awaiting the dead-letter
/// processor) then `Completed` (after it runs). `DeadLettered` documents
/// the terminal state of the *original* main-queue job instance — see
/// DESIGN.md.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Waiting,
    Delayed,
    Active,
    Completed,
    Failed,
    DeadLettered,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            JobState::Waiting => "waiting",
            JobState::Delayed => "delayed",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::DeadLettered => "dead_lettered",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseJobStateError(pub String);

impl FromStr for JobState {
    type Err = ParseJobStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(JobState::Waiting),
            "delayed" => Ok(JobState::Delayed),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "dead_lettered" => Ok(JobState::DeadLettered),
            other => Err(ParseJobStateError(other.to_owned())),
        }
    }
}

/// The unit tracked by the job store. Owned by the store for its
/// lifetime; mutated only through `JobStore` operations.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct JobRecord {
    pub job_id: i64,
    #[sqlx(try_from = "String")]
    pub queue: JobQueueColumn,
    pub message: sqlx::types::Json<Message>,
    pub attempt_count: i32,
    pub first_attempted_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub moved_to_dead_letter_at: Option<DateTime<Utc>>,
    #[sqlx(try_from = "String")]
    pub state: JobStateColumn,
    pub not_before: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Thin wrapper so `sqlx::FromRow`'s `try_from = "String"` can hand us a
/// typed `JobQueue` without requiring a custom Postgres enum type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobQueueColumn(pub JobQueue);

impl TryFrom<String> for JobQueueColumn {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "message-delivery" => Ok(JobQueueColumn(JobQueue::Main)),
            "message-delivery-dead-letter" => Ok(JobQueueColumn(JobQueue::DeadLetter)),
            other => Err(format!("{other} is not a valid JobQueue")),
        }
    }
}

impl Serialize for JobQueueColumn {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.0.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobStateColumn(pub JobState);

impl TryFrom<String> for JobStateColumn {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        JobState::from_str(&value)
            .map(JobStateColumn)
            .map_err(|e| format!("{} is not a valid JobState", e.0))
    }
}

impl Serialize for JobStateColumn {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl JobRecord {
    pub fn queue(&self) -> JobQueue {
        self.queue.0
    }

    pub fn state(&self) -> JobState {
        self.state.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_round_trips_through_str() {
        assert_eq!(Channel::from_str("http").unwrap(), Channel::Http);
        assert_eq!(Channel::from_str("EMAIL").unwrap(), Channel::Email);
        assert_eq!(Channel::from_str("internal").unwrap(), Channel::Internal);
        assert!(Channel::from_str("carrier-pigeon").is_err());
    }

    #[test]
    fn message_validate_rejects_empty_fields() {
        let mut message = Message {
            id: String::new(),
            channel: Channel::Http,
            destination: "https://example.com".to_owned(),
            data: serde_json::json!({}),
            metadata: None,
        };
        assert_eq!(message.validate(), Err(InvalidMessage::EmptyId));

        message.id = "m1".to_owned();
        message.destination = String::new();
        assert_eq!(message.validate(), Err(InvalidMessage::EmptyDestination));

        message.destination = "svc".to_owned();
        assert!(message.validate().is_ok());
    }

    #[test]
    fn job_queue_names_are_the_expected_literals() {
        assert_eq!(JobQueue::Main.as_str(), "message-delivery");
        assert_eq!(JobQueue::DeadLetter.as_str(), "message-delivery-dead-letter");
    }
}
