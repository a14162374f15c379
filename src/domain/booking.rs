//! Booking confirmation and synchronization record types.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EventId, MessageId};

/// Reference to a message returned by a mailbox listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRef {
    /// Provider message identifier.
    pub id: MessageId,
    /// When the provider received the message.
    pub received_at: DateTime<Utc>,
}

impl MessageRef {
    /// Creates a new message reference.
    pub fn new(id: impl Into<MessageId>, received_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            received_at,
        }
    }
}

/// A message that matched the sync query and is not yet processed.
///
/// Candidates are transient and never persisted.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Provider message identifier.
    pub message_id: MessageId,
    /// When the provider received the message.
    pub received_at: DateTime<Utc>,
    /// Decoded plain-text body.
    pub raw_body: String,
}

/// Event fields extracted from a booking confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFields {
    /// Class name, used as the event summary.
    pub summary: String,
    /// Local start time of the class (no zone attached).
    pub start_time: NaiveDateTime,
    /// Length of the class.
    pub duration: Duration,
}

impl EventFields {
    /// Returns the local end time of the class.
    pub fn end_time(&self) -> NaiveDateTime {
        self.start_time + self.duration
    }
}

/// Durable proof that a message was converted into a calendar event.
///
/// Records are append-only: one per successfully synchronized message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    /// Message that produced the event.
    pub message_id: MessageId,
    /// When the provider received the message. Feeds the sync cursor.
    pub message_time: DateTime<Utc>,
    /// Identifier of the created calendar event.
    pub event_id: EventId,
    /// Local start time of the created event.
    pub event_start: NaiveDateTime,
}

/// A message whose body could not be turned into an event.
///
/// Extraction is deterministic over an immutable body, so these are kept
/// aside instead of being retried on every pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// When the provider received the message.
    pub message_time: DateTime<Utc>,
    /// Why extraction failed.
    pub kind: crate::extract::FailureKind,
    /// Human-readable failure detail.
    pub detail: String,
    /// When the failure was first observed.
    pub seen_at: DateTime<Utc>,
}
