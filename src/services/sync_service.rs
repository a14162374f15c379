//! Sync service for turning booking confirmations into calendar events.
//!
//! The [`SyncService`] runs one synchronization pass at a time: it queries the
//! mail source from the store's cursor, skips messages already handled, extracts
//! event fields from each remaining body, creates the calendar event and records
//! the outcome. Candidates are processed one at a time, oldest first:
//!
//! ```text
//! New -> Filtered-Out (already known)
//! New -> Extracted -> Inserted -> Recorded
//! New -> Extraction-Failed (dead-lettered)
//! ```
//!
//! A record is only written after the calendar accepted the event, so an
//! interruption between the two can duplicate at most that one event on the
//! next pass and never loses one.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Days, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{FlushPolicy, Settings};
use crate::domain::{Candidate, DeadLetter, EventId, MessageId, MessageRef, ProcessedRecord};
use crate::extract::{FailureKind, FieldExtractor};
use crate::providers::calendar::{CalendarSink, NewEvent};
use crate::providers::mail::MailSource;
use crate::providers::ProviderError;
use crate::storage::{StoreError, SyncStore};

/// Errors that abort a sync pass.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Mail or calendar provider failure.
    #[error("provider failure: {0}")]
    Provider(#[from] ProviderError),

    /// Sync store failure.
    #[error("sync store failure: {0}")]
    Store(#[from] StoreError),
}

impl SyncError {
    /// Returns whether a later pass can be expected to succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Provider(e) => e.is_transient(),
            Self::Store(_) => false,
        }
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// An event created during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedEvent {
    /// Message the event was created from.
    pub message_id: MessageId,
    /// Identifier assigned by the calendar.
    pub event_id: EventId,
    /// Event title.
    pub summary: String,
    /// Local start time.
    pub start_time: NaiveDateTime,
}

/// Result of a sync pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncReport {
    /// Messages returned by the query.
    pub found: usize,
    /// Messages skipped because an earlier pass already handled them.
    pub skipped_duplicate: usize,
    /// Messages that did not match the booking template.
    pub skipped_unrecognized: usize,
    /// Events created in this pass.
    pub created: Vec<CreatedEvent>,
    /// Messages whose body was malformed or could not be fetched.
    pub failed: usize,
    /// Duration of the pass.
    pub duration_ms: u64,
}

impl SyncReport {
    /// Returns true if the pass found nothing new.
    pub fn is_empty(&self) -> bool {
        self.found == self.skipped_duplicate
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "found {}, skipped {} duplicate, {} unrecognized, created {}, failed {}",
            self.found,
            self.skipped_duplicate,
            self.skipped_unrecognized,
            self.created.len(),
            self.failed
        )
    }
}

/// Mailbox query for booking confirmations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncQuery {
    /// Sender address filter.
    pub sender: String,
    /// Subject substring filter.
    pub subject: String,
}

impl SyncQuery {
    /// Renders the provider query, bounded below by `after` when set.
    ///
    /// The bound has date granularity and is widened by a day so messages on
    /// the cursor's own date are always listed again; id filtering removes the
    /// overlap.
    pub fn render(&self, after: Option<DateTime<Utc>>) -> String {
        let mut query = format!("from:{} subject:\"{}\"", self.sender, self.subject);
        if let Some(after) = after {
            let date = after.date_naive();
            let bound = date.checked_sub_days(Days::new(1)).unwrap_or(date);
            query.push_str(&format!(" after:{}", bound.format("%Y/%m/%d")));
        }
        query
    }
}

/// One synchronization pass.
///
/// Implemented by [`SyncService`]; the poll loop only depends on this.
#[async_trait::async_trait]
pub trait SyncPass: Send {
    /// Runs a single pass to completion.
    async fn run_once(&mut self) -> Result<SyncReport>;
}

/// Sync service for booking confirmations.
///
/// # Example
///
/// ```ignore
/// let store = SyncStore::load(settings.state_path()?)?;
/// let mut service = SyncService::new(&settings, mail, calendar, extractor, store);
///
/// let report = service.run_once().await?;
/// println!("{}", report);
/// ```
pub struct SyncService {
    mail: Arc<dyn MailSource>,
    calendar: Arc<dyn CalendarSink>,
    extractor: Box<dyn FieldExtractor>,
    store: SyncStore,
    query: SyncQuery,
    timezone: String,
    flush: FlushPolicy,
}

impl SyncService {
    /// Creates a new SyncService.
    pub fn new(
        settings: &Settings,
        mail: Arc<dyn MailSource>,
        calendar: Arc<dyn CalendarSink>,
        extractor: Box<dyn FieldExtractor>,
        store: SyncStore,
    ) -> Self {
        Self {
            mail,
            calendar,
            extractor,
            store,
            query: SyncQuery {
                sender: settings.mail.sender.clone(),
                subject: settings.mail.subject.clone(),
            },
            timezone: settings.calendar.timezone.clone(),
            flush: settings.sync.flush,
        }
    }

    /// Returns the sync store.
    pub fn store(&self) -> &SyncStore {
        &self.store
    }

    /// Consumes the service, returning the sync store.
    pub fn into_store(self) -> SyncStore {
        self.store
    }

    /// Runs one synchronization pass.
    ///
    /// Provider failures abort the pass after persisting what was already
    /// recorded; the next pass resumes from the unchanged cursor.
    pub async fn run_once(&mut self) -> Result<SyncReport> {
        let start = Instant::now();
        let cursor = self.store.cursor();
        let query = self.query.render(cursor);
        tracing::info!(%query, "Starting sync pass");

        let mut report = SyncReport::default();
        let result = self.do_sync(&query, &mut report).await;

        if let Err(e) = &result {
            tracing::warn!(error = %e, "Sync pass aborted");
            if let Err(persist_err) = self.store.persist() {
                tracing::error!(error = %persist_err, "Failed to persist sync state after abort");
            }
        }
        result?;

        self.store.persist()?;
        report.duration_ms = start.elapsed().as_millis() as u64;

        if report.is_empty() {
            tracing::info!("No new mails");
        } else {
            tracing::info!(%report, "Sync pass complete");
        }
        Ok(report)
    }

    /// Internal sync implementation.
    async fn do_sync(&mut self, query: &str, report: &mut SyncReport) -> Result<()> {
        let listed = self.list_all(query).await?;
        report.found = listed.len();

        let mut seen = HashSet::new();
        let mut pending = Vec::new();
        for message in listed {
            if self.store.is_known(&message.id) || !seen.insert(message.id.clone()) {
                report.skipped_duplicate += 1;
            } else {
                pending.push(message);
            }
        }

        // Oldest first: the cursor is the newest recorded time, so it must
        // never get ahead of a candidate an aborted pass left unprocessed.
        pending.sort_by(|a, b| {
            a.received_at
                .cmp(&b.received_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        for message in pending {
            self.process(message, report).await?;
        }
        Ok(())
    }

    /// Drains every page of the listing.
    async fn list_all(&self, query: &str) -> Result<Vec<MessageRef>> {
        let mut messages = Vec::new();
        let mut page_token = None;
        loop {
            let page = self.mail.list_page(query, page_token.take()).await?;
            messages.extend(page.messages);
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(messages)
    }

    /// Takes one candidate from New to a terminal state.
    async fn process(&mut self, message: MessageRef, report: &mut SyncReport) -> Result<()> {
        let raw_body = match self.mail.fetch_body(&message.id).await {
            Ok(body) => body,
            Err(ProviderError::NotFound(_)) => {
                tracing::warn!(message_id = %message.id, "Message disappeared before fetch");
                report.failed += 1;
                return Ok(());
            }
            Err(ProviderError::UndecodableMessage(detail)) => {
                tracing::warn!(message_id = %message.id, %detail, "Undecodable message body");
                report.failed += 1;
                self.store.dead_letter(
                    message.id,
                    DeadLetter {
                        message_time: message.received_at,
                        kind: FailureKind::MalformedBody,
                        detail,
                        seen_at: Utc::now(),
                    },
                );
                return self.flush_item();
            }
            Err(e) => return Err(e.into()),
        };
        let candidate = Candidate {
            message_id: message.id,
            received_at: message.received_at,
            raw_body,
        };

        let fields = match self.extractor.extract(&candidate.raw_body) {
            Ok(fields) => fields,
            Err(failure) => {
                tracing::warn!(
                    message_id = %candidate.message_id,
                    kind = ?failure.kind,
                    detail = %failure.detail,
                    "Skipping message"
                );
                match failure.kind {
                    FailureKind::UnrecognizedFormat => report.skipped_unrecognized += 1,
                    FailureKind::MalformedBody => report.failed += 1,
                }
                self.store.dead_letter(
                    candidate.message_id,
                    DeadLetter {
                        message_time: candidate.received_at,
                        kind: failure.kind,
                        detail: failure.detail,
                        seen_at: Utc::now(),
                    },
                );
                return self.flush_item();
            }
        };

        let event = NewEvent::from_fields(&fields, self.timezone.as_str());
        let event_id = self.calendar.insert(&event).await?;

        let record = ProcessedRecord {
            message_id: candidate.message_id.clone(),
            message_time: candidate.received_at,
            event_id: event_id.clone(),
            event_start: fields.start_time,
        };
        if let Err(e) = self.store.record(record) {
            tracing::error!(
                message_id = %candidate.message_id,
                error = %e,
                "Recorded a message twice; candidate filtering is broken"
            );
            debug_assert!(false, "duplicate record for {}", candidate.message_id);
            return Err(e.into());
        }

        tracing::info!(
            message_id = %candidate.message_id,
            event_id = %event_id,
            summary = %fields.summary,
            start = %fields.start_time,
            "Created event"
        );
        report.created.push(CreatedEvent {
            message_id: candidate.message_id,
            event_id,
            summary: fields.summary,
            start_time: fields.start_time,
        });

        self.flush_item()
    }

    /// Persists after an item when the flush policy asks for it.
    fn flush_item(&mut self) -> Result<()> {
        if self.flush == FlushPolicy::PerItem {
            self.store.persist()?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl SyncPass for SyncService {
    async fn run_once(&mut self) -> Result<SyncReport> {
        SyncService::run_once(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::BookingExtractor;
    use crate::providers::calendar::MockCalendarSink;
    use crate::providers::mail::{MailSource, MessagePage, MockMailSource};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory mailbox for testing.
    struct MockMailbox {
        pages: Vec<Vec<MessageRef>>,
        bodies: HashMap<String, String>,
        queries: Mutex<Vec<String>>,
    }

    impl MockMailbox {
        fn new(messages: &[(&str, i64, &str)]) -> Self {
            let refs = messages
                .iter()
                .map(|(id, secs, _)| MessageRef::new(*id, DateTime::from_timestamp(*secs, 0).unwrap()))
                .collect();
            Self {
                pages: vec![refs],
                bodies: messages
                    .iter()
                    .map(|(id, _, body)| (id.to_string(), body.to_string()))
                    .collect(),
                queries: Mutex::new(Vec::new()),
            }
        }

        fn paged(mut self, page_size: usize) -> Self {
            let all: Vec<MessageRef> = self.pages.concat();
            self.pages = all.chunks(page_size).map(|c| c.to_vec()).collect();
            self
        }
    }

    #[async_trait::async_trait]
    impl MailSource for MockMailbox {
        async fn list_page(
            &self,
            query: &str,
            page_token: Option<String>,
        ) -> crate::providers::Result<MessagePage> {
            self.queries.lock().unwrap().push(query.to_string());
            let index: usize = page_token.map(|t| t.parse().unwrap()).unwrap_or(0);
            let messages = self.pages.get(index).cloned().unwrap_or_default();
            let next_page_token = (index + 1 < self.pages.len()).then(|| (index + 1).to_string());
            Ok(MessagePage {
                messages,
                next_page_token,
            })
        }

        async fn fetch_body(&self, message_id: &MessageId) -> crate::providers::Result<String> {
            self.bodies
                .get(&message_id.0)
                .cloned()
                .ok_or_else(|| ProviderError::NotFound(message_id.to_string()))
        }
    }

    /// Calendar that hands out sequential ids.
    #[derive(Default)]
    struct MockCalendar {
        inserted: Mutex<Vec<NewEvent>>,
    }

    #[async_trait::async_trait]
    impl CalendarSink for MockCalendar {
        async fn insert(&self, event: &NewEvent) -> crate::providers::Result<EventId> {
            let mut inserted = self.inserted.lock().unwrap();
            inserted.push(event.clone());
            Ok(EventId::from(format!("evt-{}", inserted.len())))
        }
    }

    fn body(class: &str, date: &str, time: &str) -> String {
        format!("Zdrofit\nZajęcia: *{}*\nData: *{}*\nGodzina: *{}*\n", class, date, time)
    }

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.mail.sender = "bookings@example.com".to_string();
        settings
    }

    fn service(
        mail: Arc<dyn MailSource>,
        calendar: Arc<dyn CalendarSink>,
        store: SyncStore,
    ) -> SyncService {
        SyncService::new(
            &settings(),
            mail,
            calendar,
            Box::new(BookingExtractor::default()),
            store,
        )
    }

    #[test]
    fn query_without_cursor() {
        let query = SyncQuery {
            sender: "bookings@example.com".to_string(),
            subject: "Potwierdzenie rezerwacji".to_string(),
        };
        assert_eq!(
            query.render(None),
            "from:bookings@example.com subject:\"Potwierdzenie rezerwacji\""
        );
    }

    #[test]
    fn query_with_cursor_widens_by_a_day() {
        let query = SyncQuery {
            sender: "b@example.com".to_string(),
            subject: "Booked".to_string(),
        };
        let cursor = "2024-06-01T00:10:00Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(
            query.render(Some(cursor)),
            "from:b@example.com subject:\"Booked\" after:2024/05/31"
        );
    }

    #[test]
    fn report_display_and_emptiness() {
        let report = SyncReport {
            found: 3,
            skipped_duplicate: 3,
            ..SyncReport::default()
        };
        assert!(report.is_empty());
        assert_eq!(
            report.to_string(),
            "found 3, skipped 3 duplicate, 0 unrecognized, created 0, failed 0"
        );
    }

    #[tokio::test]
    async fn creates_event_and_records_it() {
        let dir = tempfile::tempdir().unwrap();
        let mail = Arc::new(MockMailbox::new(&[(
            "m1",
            1_718_000_000,
            &body("Pilates", "12-06-2024", "18:30"),
        )]));
        let calendar = Arc::new(MockCalendar::default());
        let store = SyncStore::load(dir.path().join("state.json")).unwrap();

        let mut service = service(mail, calendar.clone(), store);
        let report = service.run_once().await.unwrap();

        assert_eq!(report.found, 1);
        assert_eq!(report.created.len(), 1);
        assert_eq!(report.created[0].summary, "Pilates");
        assert_eq!(report.created[0].event_id, EventId::from("evt-1"));

        let inserted = calendar.inserted.lock().unwrap();
        assert_eq!(inserted[0].timezone, "Europe/Warsaw");
        assert_eq!(inserted[0].duration, chrono::Duration::minutes(90));

        let record = service.store().get(&MessageId::from("m1")).unwrap();
        assert_eq!(record.event_id, EventId::from("evt-1"));
        assert_eq!(service.store().cursor(), DateTime::from_timestamp(1_718_000_000, 0));
        assert!(dir.path().join("state.json").exists());
    }

    #[tokio::test]
    async fn second_pass_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mail = Arc::new(MockMailbox::new(&[
            ("m1", 1_000, &body("Pilates", "12-06-2024", "18:30")),
            ("m2", 2_000, &body("Yoga", "13-06-2024", "07:00")),
        ]));
        let calendar = Arc::new(MockCalendar::default());

        let mut service = service(
            mail.clone(),
            calendar.clone(),
            SyncStore::load(dir.path().join("state.json")).unwrap(),
        );
        assert_eq!(service.run_once().await.unwrap().created.len(), 2);

        let report = service.run_once().await.unwrap();
        assert!(report.created.is_empty());
        assert_eq!(report.skipped_duplicate, 2);
        assert!(report.is_empty());
        assert_eq!(calendar.inserted.lock().unwrap().len(), 2);

        let queries = mail.queries.lock().unwrap();
        assert!(!queries[0].contains("after:"));
        assert!(queries[1].contains("after:1969/12/31"));
    }

    #[tokio::test]
    async fn drains_every_page() {
        let dir = tempfile::tempdir().unwrap();
        let mail = Arc::new(
            MockMailbox::new(&[
                ("m1", 1_000, &body("A", "01-01-2024", "10:00")),
                ("m2", 2_000, &body("B", "02-01-2024", "10:00")),
                ("m3", 3_000, &body("C", "03-01-2024", "10:00")),
            ])
            .paged(1),
        );
        let calendar = Arc::new(MockCalendar::default());

        let mut service = service(
            mail.clone(),
            calendar,
            SyncStore::load(dir.path().join("state.json")).unwrap(),
        );
        let report = service.run_once().await.unwrap();

        assert_eq!(report.found, 3);
        assert_eq!(report.created.len(), 3);
        assert_eq!(mail.queries.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn failed_extractions_are_dead_lettered() {
        let dir = tempfile::tempdir().unwrap();
        let mail = Arc::new(MockMailbox::new(&[
            ("news", 1_000, "Weekly newsletter"),
            ("broken", 2_000, "Zdrofit *Pilates* but no date"),
            ("ok", 3_000, &body("Spin", "05-05-2024", "06:00")),
        ]));
        let calendar = Arc::new(MockCalendar::default());

        let mut service = service(
            mail,
            calendar.clone(),
            SyncStore::load(dir.path().join("state.json")).unwrap(),
        );
        let report = service.run_once().await.unwrap();

        assert_eq!(report.skipped_unrecognized, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.created.len(), 1);
        assert!(service.store().is_dead_letter(&MessageId::from("news")));
        assert!(service.store().is_dead_letter(&MessageId::from("broken")));
        assert!(!service.store().contains(&MessageId::from("broken")));

        let report = service.run_once().await.unwrap();
        assert_eq!(report.skipped_duplicate, 3);
        assert_eq!(calendar.inserted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn repeated_id_in_listing_is_processed_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut mailbox = MockMailbox::new(&[("m1", 1_000, &body("A", "01-01-2024", "10:00"))]);
        let repeated = mailbox.pages[0][0].clone();
        mailbox.pages.push(vec![repeated]);
        let calendar = Arc::new(MockCalendar::default());

        let mut service = service(
            Arc::new(mailbox),
            calendar.clone(),
            SyncStore::load(dir.path().join("state.json")).unwrap(),
        );
        let report = service.run_once().await.unwrap();

        assert_eq!(report.found, 2);
        assert_eq!(report.skipped_duplicate, 1);
        assert_eq!(calendar.inserted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn vanished_message_is_counted_as_failed() {
        let dir = tempfile::tempdir().unwrap();
        let mut mailbox = MockMailbox::new(&[("m1", 1_000, &body("A", "01-01-2024", "10:00"))]);
        mailbox.bodies.clear();

        let mut service = service(
            Arc::new(mailbox),
            Arc::new(MockCalendar::default()),
            SyncStore::load(dir.path().join("state.json")).unwrap(),
        );
        let report = service.run_once().await.unwrap();

        assert_eq!(report.failed, 1);
        assert!(!service.store().is_known(&MessageId::from("m1")));
    }

    #[tokio::test]
    async fn undecodable_body_is_dead_lettered() {
        let mut mail = MockMailSource::new();
        mail.expect_list_page().returning(|_, _| {
            Ok(MessagePage::last(vec![MessageRef::new(
                "garbled",
                DateTime::from_timestamp(1_000, 0).unwrap(),
            )]))
        });
        mail.expect_fetch_body()
            .times(1)
            .returning(|_| {
                Err(ProviderError::UndecodableMessage(
                    "unparseable MIME message".to_string(),
                ))
            });
        let mut calendar = MockCalendarSink::new();
        calendar.expect_insert().never();

        let dir = tempfile::tempdir().unwrap();
        let mut service = service(
            Arc::new(mail),
            Arc::new(calendar),
            SyncStore::load(dir.path().join("state.json")).unwrap(),
        );

        let report = service.run_once().await.unwrap();
        assert_eq!(report.failed, 1);
        assert!(service.store().is_dead_letter(&MessageId::from("garbled")));

        let report = service.run_once().await.unwrap();
        assert_eq!(report.skipped_duplicate, 1);
    }

    #[tokio::test]
    async fn transient_fetch_failure_is_retried_not_dead_lettered() {
        let mut mail = MockMailSource::new();
        mail.expect_list_page().returning(|_, _| {
            Ok(MessagePage::last(vec![MessageRef::new(
                "m1",
                DateTime::from_timestamp(1_000, 0).unwrap(),
            )]))
        });
        let mut fetches = 0;
        mail.expect_fetch_body().times(2).returning(move |_| {
            fetches += 1;
            if fetches == 1 {
                Err(ProviderError::Internal("parse response: truncated body".to_string()))
            } else {
                Ok(body("Pilates", "12-06-2024", "18:30"))
            }
        });
        let mut calendar = MockCalendarSink::new();
        calendar
            .expect_insert()
            .times(1)
            .returning(|_| Ok(EventId::from("evt-1")));

        let dir = tempfile::tempdir().unwrap();
        let mut service = service(
            Arc::new(mail),
            Arc::new(calendar),
            SyncStore::load(dir.path().join("state.json")).unwrap(),
        );

        let err = service.run_once().await.unwrap_err();
        assert!(err.is_transient());
        assert!(!service.store().is_known(&MessageId::from("m1")));

        let report = service.run_once().await.unwrap();
        assert_eq!(report.created.len(), 1);
    }

    #[tokio::test]
    async fn newest_first_listing_is_processed_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut mailbox = MockMailbox::new(&[
            ("old", 1_000, &body("Yoga", "01-06-2024", "09:00")),
            ("new", 9_000, &body("Pilates", "10-06-2024", "18:30")),
        ]);
        mailbox.pages[0].reverse();

        let mut calendar = MockCalendarSink::new();
        let mut calls = 0;
        calendar.expect_insert().times(3).returning(move |event| {
            calls += 1;
            match calls {
                1 => {
                    assert_eq!(event.summary, "Yoga");
                    Ok(EventId::from("evt-yoga"))
                }
                2 => Err(ProviderError::Connection("reset".to_string())),
                _ => Ok(EventId::from("evt-pilates")),
            }
        });

        let mut service = service(Arc::new(mailbox), Arc::new(calendar), SyncStore::load(&path).unwrap());

        assert!(service.run_once().await.unwrap_err().is_transient());
        assert_eq!(service.store().cursor(), DateTime::from_timestamp(1_000, 0));

        let report = service.run_once().await.unwrap();
        assert_eq!(report.created.len(), 1);
        assert_eq!(report.created[0].summary, "Pilates");
        assert_eq!(service.store().len(), 2);
    }

    #[tokio::test]
    async fn calendar_failure_aborts_pass_and_keeps_earlier_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mail = Arc::new(MockMailbox::new(&[
            ("m1", 1_000, &body("A", "01-01-2024", "10:00")),
            ("m2", 2_000, &body("B", "02-01-2024", "10:00")),
        ]));

        let mut calendar = MockCalendarSink::new();
        let mut calls = 0;
        calendar.expect_insert().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Ok(EventId::from("evt-a"))
            } else {
                Err(ProviderError::Connection("reset by peer".to_string()))
            }
        });

        let mut settings = settings();
        settings.sync.flush = FlushPolicy::PerPass;
        let mut service = SyncService::new(
            &settings,
            mail,
            Arc::new(calendar),
            Box::new(BookingExtractor::default()),
            SyncStore::load(&path).unwrap(),
        );

        let err = service.run_once().await.unwrap_err();
        assert!(err.is_transient());

        let persisted = SyncStore::load(&path).unwrap();
        assert!(persisted.contains(&MessageId::from("m1")));
        assert!(!persisted.contains(&MessageId::from("m2")));
    }

    #[tokio::test]
    async fn listing_failure_aborts_without_inserting() {
        let mut mail = MockMailSource::new();
        mail.expect_list_page()
            .returning(|_, _| Err(ProviderError::RateLimited { retry_after_secs: Some(10) }));
        let mut calendar = MockCalendarSink::new();
        calendar.expect_insert().never();

        let mut service = service(
            Arc::new(mail),
            Arc::new(calendar),
            SyncStore::empty(tempfile::tempdir().unwrap().path().join("state.json")),
        );

        let err = service.run_once().await.unwrap_err();
        assert!(matches!(err, SyncError::Provider(ProviderError::RateLimited { .. })));
    }

    #[tokio::test]
    async fn per_item_flush_persists_before_next_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mail = Arc::new(MockMailbox::new(&[
            ("m1", 1_000, &body("A", "01-01-2024", "10:00")),
            ("m2", 2_000, &body("B", "02-01-2024", "10:00")),
        ]));

        let observed_path = path.clone();
        let mut calendar = MockCalendarSink::new();
        let mut calls = 0;
        calendar.expect_insert().times(2).returning(move |_| {
            calls += 1;
            if calls == 2 {
                let on_disk = SyncStore::load(&observed_path).unwrap();
                assert!(on_disk.contains(&MessageId::from("m1")));
            }
            Ok(EventId::from(format!("evt-{}", calls)))
        });

        let mut service = service(mail, Arc::new(calendar), SyncStore::load(&path).unwrap());
        assert_eq!(service.run_once().await.unwrap().created.len(), 2);
    }
}
