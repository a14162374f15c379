//! Calendar sink implementations.
//!
//! - [`GoogleCalendarSink`] - Google Calendar API with OAuth 2.0

mod google;
mod traits;

pub use google::GoogleCalendarSink;
pub use traits::{CalendarSink, NewEvent};

#[cfg(test)]
pub use traits::MockCalendarSink;
