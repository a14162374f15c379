//! Business services layer.
//!
//! This module contains the services that orchestrate synchronization,
//! coordinating between providers, storage, and domain types.
//!
//! # Architecture
//!
//! Services sit between the command line and the infrastructure layer:
//!
//! ```text
//! CLI (run, once, status, login)
//!          |
//!          v
//!    Services Layer  <-- You are here
//!          |
//!          v
//! Infrastructure (Providers, Storage)
//! ```
//!
//! # Services Overview
//!
//! - [`SyncService`]: Runs one pass from mailbox query to recorded calendar events
//! - [`PollService`]: Repeats passes on an interval until cancelled

mod poll_service;
mod sync_service;

pub use poll_service::{PollService, PollSummary};
pub use sync_service::{
    CreatedEvent, Result, SyncError, SyncPass, SyncQuery, SyncReport, SyncService,
};
