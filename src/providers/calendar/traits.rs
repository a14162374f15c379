//! Calendar sink trait definition.

use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime};

use crate::domain::{EventFields, EventId};
use crate::providers::Result;

/// An event to be created in the target calendar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    /// Event title.
    pub summary: String,
    /// Local start time in `timezone`.
    pub start_time: NaiveDateTime,
    /// Event length.
    pub duration: Duration,
    /// IANA zone name the local times are in.
    pub timezone: String,
}

impl NewEvent {
    /// Builds an event from extracted fields in the given zone.
    pub fn from_fields(fields: &EventFields, timezone: impl Into<String>) -> Self {
        Self {
            summary: fields.summary.clone(),
            start_time: fields.start_time,
            duration: fields.duration,
            timezone: timezone.into(),
        }
    }

    /// Returns the local end time.
    pub fn end_time(&self) -> NaiveDateTime {
        self.start_time + self.duration
    }
}

/// Trait for calendar implementations that can create events.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CalendarSink: Send + Sync {
    /// Creates an event and returns the identifier the calendar assigned.
    async fn insert(&self, event: &NewEvent) -> Result<EventId>;
}
