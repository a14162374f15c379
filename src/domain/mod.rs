//! Domain layer types for classcal.
//!
//! This module contains the core domain types shared by the extractor, the
//! sync store and the sync service.

mod booking;
mod types;

pub use booking::{Candidate, DeadLetter, EventFields, MessageRef, ProcessedRecord};
pub use types::{EventId, MessageId};
