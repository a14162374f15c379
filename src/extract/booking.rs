//! Booking confirmation template grammar.
//!
//! Confirmation bodies carry the booked class name, the class date and the
//! start time as asterisk-delimited fields, in that order:
//!
//! ```text
//! Zdrofit - potwierdzenie rezerwacji
//! Zajęcia: *Pilates*
//! Data: *12-06-2024*
//! Godzina: *18:30*
//! ```

use chrono::{Duration, NaiveDateTime};
use regex::Regex;

use super::{ExtractionFailure, FieldExtractor};
use crate::config::ExtractorSettings;
use crate::domain::EventFields;

/// Number of delimited fields the template must provide.
const REQUIRED_FIELDS: usize = 3;

/// [`FieldExtractor`] for the booking service's confirmation template.
#[derive(Debug, Clone)]
pub struct BookingExtractor {
    marker: String,
    datetime_format: String,
    duration: Duration,
    field_pattern: Regex,
}

impl BookingExtractor {
    /// Creates an extractor from settings and the configured event length.
    pub fn new(settings: &ExtractorSettings, duration_minutes: u32) -> Self {
        Self {
            marker: settings.marker.clone(),
            datetime_format: format!("{} {}", settings.date_format, settings.time_format),
            duration: Duration::minutes(i64::from(duration_minutes)),
            field_pattern: Regex::new(r"\*(\w[^*\n]*)\*").expect("static pattern is valid"),
        }
    }

    /// Returns the delimited fields found in the body, in order.
    fn fields<'a>(&self, body: &'a str) -> Vec<&'a str> {
        self.field_pattern
            .captures_iter(body)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().trim())
            .collect()
    }
}

impl Default for BookingExtractor {
    fn default() -> Self {
        Self::new(&ExtractorSettings::default(), 90)
    }
}

impl FieldExtractor for BookingExtractor {
    fn extract(&self, body: &str) -> Result<EventFields, ExtractionFailure> {
        if !body.contains(&self.marker) {
            return Err(ExtractionFailure::unrecognized(format!(
                "marker {:?} not found",
                self.marker
            )));
        }

        let fields = self.fields(body);
        if fields.len() < REQUIRED_FIELDS {
            return Err(ExtractionFailure::malformed(format!(
                "expected {} delimited fields, found {}",
                REQUIRED_FIELDS,
                fields.len()
            )));
        }

        let summary = fields[0];
        let stamp = format!("{} {}", fields[1], fields[2]);
        let start_time = NaiveDateTime::parse_from_str(&stamp, &self.datetime_format)
            .map_err(|e| ExtractionFailure::malformed(format!("bad date/time {:?}: {}", stamp, e)))?;

        Ok(EventFields {
            summary: summary.to_string(),
            start_time,
            duration: self.duration,
        })
    }
}
