//! Remote log API error types.

use std::time::Duration;

use auditscope_types::Quota;

/// Errors from a single call to the remote log API
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The fetch was aborted because its session stopped.
    #[error("request cancelled")]
    Cancelled,

    /// The remote quota is exhausted.
    #[error("log API rate limit exceeded")]
    RateLimited {
        /// Server-advised wait, if the response carried one.
        retry_after: Option<Duration>,
        /// Quota headers present on the rejection.
        quota: Quota,
    },

    /// Non-2xx response other than a rate limit.
    #[error("log API returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Leading part of the response body.
        body: String,
    },

    /// The whole request did not finish in time.
    #[error("log API request timed out after {0:?}")]
    Timeout(Duration),

    /// The response body exceeded the configured limit.
    #[error("log API response exceeds {limit} bytes")]
    ResponseTooLarge {
        /// Maximum allowed size.
        limit: usize,
    },

    /// The response was not the expected JSON shape.
    #[error("unexpected log API response: {0}")]
    Decode(String),

    /// Credentials cannot be used to build a client.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Connection, TLS or protocol failure below HTTP.
    #[error("log API request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ApiError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Result type for log API operations.
pub type ApiResult<T> = Result<T, ApiError>;
