//! classcal - Booking confirmation to calendar event sync
//!
//! This crate polls a mailbox for fitness class booking confirmations,
//! extracts the booked class and its start time, and creates a matching
//! calendar event exactly once per message.

pub mod config;
pub mod domain;
pub mod extract;
pub mod providers;
pub mod services;
pub mod storage;
