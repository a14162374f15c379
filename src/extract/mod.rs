//! Field extraction from booking confirmation bodies.
//!
//! The [`FieldExtractor`] trait is the seam between the sync service and the
//! provider-specific template grammar. Extraction never panics on unexpected
//! input; it reports an [`ExtractionFailure`] that the sync service can log and
//! set aside without aborting the pass.

mod booking;

pub use booking::BookingExtractor;

use serde::{Deserialize, Serialize};

use crate::domain::EventFields;

/// Why a body could not be turned into event fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The body does not carry the provider template marker.
    UnrecognizedFormat,
    /// The marker is present but the fields could not be read.
    MalformedBody,
}

/// Failure returned by a [`FieldExtractor`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?}: {detail}")]
pub struct ExtractionFailure {
    /// Failure classification.
    pub kind: FailureKind,
    /// What was wrong with the body.
    pub detail: String,
}

impl ExtractionFailure {
    /// Creates an unrecognized-format failure.
    pub fn unrecognized(detail: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::UnrecognizedFormat,
            detail: detail.into(),
        }
    }

    /// Creates a malformed-body failure.
    pub fn malformed(detail: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::MalformedBody,
            detail: detail.into(),
        }
    }
}

/// Pure conversion of an email body into event fields.
///
/// Implementations must be deterministic and free of side effects.
pub trait FieldExtractor: Send + Sync {
    /// Extracts event fields from a decoded plain-text body.
    fn extract(&self, body: &str) -> std::result::Result<EventFields, ExtractionFailure>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_kind_serialization() {
        let json = serde_json::to_string(&FailureKind::MalformedBody).unwrap();
        assert_eq!(json, "\"malformed_body\"");

        let kind: FailureKind = serde_json::from_str("\"unrecognized_format\"").unwrap();
        assert_eq!(kind, FailureKind::UnrecognizedFormat);
    }

    #[test]
    fn failure_display_includes_detail() {
        let failure = ExtractionFailure::malformed("missing start time");
        assert!(failure.to_string().contains("missing start time"));
        assert_eq!(failure.kind, FailureKind::MalformedBody);
    }
}
