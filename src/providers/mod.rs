//! Mail and calendar provider implementations.
//!
//! This module contains the provider traits the sync service depends on and
//! their Google implementations:
//!
//! - [`mail`] - Mail sources (Gmail API)
//! - [`calendar`] - Calendar sinks (Google Calendar API)
//! - [`GoogleSession`] - OAuth session shared by both

pub mod calendar;
mod error;
mod google;
pub mod mail;

pub use error::{ProviderError, Result};
pub use google::GoogleSession;
