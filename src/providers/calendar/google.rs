//! Google Calendar sink.
//!
//! Creates events with `events.insert`. Start and end are sent as local
//! wall-clock times together with the IANA zone, so the calendar resolves
//! daylight-saving offsets itself.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use super::{CalendarSink, NewEvent};
use crate::domain::EventId;
use crate::providers::google::{self, GoogleSession};
use crate::providers::{ProviderError, Result};

const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3/";

/// Calendar API event resource (insert subset).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EventResource {
    summary: String,
    start: EventDateTime,
    end: EventDateTime,
    reminders: Reminders,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EventDateTime {
    date_time: String,
    time_zone: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Reminders {
    use_default: bool,
}

/// Calendar API insert response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertedEvent {
    id: String,
    html_link: Option<String>,
}

impl EventResource {
    fn new(event: &NewEvent, use_default_reminders: bool) -> Self {
        let stamp = |t: chrono::NaiveDateTime| t.format("%Y-%m-%dT%H:%M:%S").to_string();
        Self {
            summary: event.summary.clone(),
            start: EventDateTime {
                date_time: stamp(event.start_time),
                time_zone: event.timezone.clone(),
            },
            end: EventDateTime {
                date_time: stamp(event.end_time()),
                time_zone: event.timezone.clone(),
            },
            reminders: Reminders {
                use_default: use_default_reminders,
            },
        }
    }
}

/// Google Calendar event sink.
pub struct GoogleCalendarSink {
    session: Arc<GoogleSession>,
    calendar_id: String,
    use_default_reminders: bool,
    base_url: String,
}

impl GoogleCalendarSink {
    /// Creates a sink writing to `calendar_id` ("primary" for the user's
    /// main calendar).
    pub fn new(session: Arc<GoogleSession>, calendar_id: impl Into<String>) -> Self {
        Self {
            session,
            calendar_id: calendar_id.into(),
            use_default_reminders: true,
            base_url: CALENDAR_API_BASE.to_string(),
        }
    }

    /// Sets whether created events use the calendar's default reminders.
    pub fn with_default_reminders(mut self, enabled: bool) -> Self {
        self.use_default_reminders = enabled;
        self
    }

    /// Overrides the API base URL. Must end with a slash.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Builds the insert URL, percent-encoding the calendar id.
    fn events_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ProviderError::InvalidRequest(format!("bad base URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| ProviderError::InvalidRequest("base URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["calendars", self.calendar_id.as_str(), "events"]);
        Ok(url)
    }
}

#[async_trait]
impl CalendarSink for GoogleCalendarSink {
    async fn insert(&self, event: &NewEvent) -> Result<EventId> {
        let url = self.events_url()?;
        let body = EventResource::new(event, self.use_default_reminders);

        let response = self
            .session
            .send(|client| client.post(url.clone()).json(&body))
            .await?;
        let inserted: InsertedEvent = google::json(response).await?;

        tracing::debug!(
            event_id = %inserted.id,
            link = inserted.html_link.as_deref().unwrap_or(""),
            "Inserted Google Calendar event"
        );
        Ok(EventId::from(inserted.id))
    }
}
