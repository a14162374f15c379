//! Errors shared by the mail and calendar providers.

/// Result type alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Errors that can occur during provider operations.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Authentication failed or credentials expired.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Network or connection error.
    #[error("connection error: {0}")]
    Connection(String),

    /// Rate limit exceeded.
    #[error("rate limit exceeded, retry after {retry_after_secs:?} seconds")]
    RateLimited {
        /// Seconds to wait before retrying, if known.
        retry_after_secs: Option<u64>,
    },

    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid request or parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Provider-side failure (5xx).
    #[error("provider error: {0}")]
    Provider(String),

    /// A message exists but its content cannot be decoded.
    ///
    /// Scoped to that one message; retrying cannot change the outcome.
    #[error("undecodable message: {0}")]
    UndecodableMessage(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProviderError {
    /// Returns whether the next pass can be expected to succeed unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::RateLimited { .. } | Self::Provider(_) | Self::Internal(_)
        )
    }

    /// Maps an unsuccessful HTTP status to an error.
    pub fn from_status(status: u16, retry_after_secs: Option<u64>, body: String) -> Self {
        match status {
            400 => Self::InvalidRequest(body),
            403 if is_rate_limit_reason(&body) => Self::RateLimited { retry_after_secs },
            401 | 403 => Self::Authentication(format!("unauthorized ({}): {}", status, body)),
            408 => Self::Connection(format!("request timeout: {}", body)),
            404 => Self::NotFound(body),
            429 => Self::RateLimited { retry_after_secs },
            500..=599 => Self::Provider(format!("API error ({}): {}", status, body)),
            _ => Self::Internal(format!("API error ({}): {}", status, body)),
        }
    }
}

/// Google reports quota exhaustion as 403 with one of these reasons.
fn is_rate_limit_reason(body: &str) -> bool {
    ["rateLimitExceeded", "userRateLimitExceeded"]
        .iter()
        .any(|reason| body.contains(&format!("\"{}\"", reason)))
}
