//! Shared types for auditscope
//!
//! This crate contains data structures used across multiple auditscope crates:
//! log records as they arrive from the remote API and as they are shown to a
//! viewer, the noise category catalog entries, quota status, and the control
//! protocol spoken over the client connection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// ============================================================================
// Log Types
// ============================================================================

/// Record type the remote API uses for unstructured text lines
pub const PLAINTEXT_TYPE: &str = "text/plain";

/// A single log record as returned by the remote tail endpoint
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct RawLogRecord {
    #[serde(default)]
    pub timestamp: String,

    #[serde(default)]
    pub source: String,

    /// Content type of the payload (`application/json`, `text/plain`, ...)
    #[serde(rename = "type", default)]
    pub kind: String,

    /// Either a bare string or an object whose shape depends on the source
    #[serde(default)]
    pub payload: Value,
}

impl RawLogRecord {
    pub fn new(source: impl Into<String>, kind: impl Into<String>, payload: Value) -> Self {
        Self {
            timestamp: String::new(),
            source: source.into(),
            kind: kind.into(),
            payload,
        }
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = timestamp.into();
        self
    }
}

/// A normalized record ready for display
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayLogRecord {
    pub timestamp: String,
    pub source: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub level: String,
    pub logger: String,
    pub transaction_id: String,

    /// Human-readable summary, at most 500 characters
    pub message: String,

    /// Original payload in structured form
    pub payload: Value,
}

// ============================================================================
// Noise Catalog Types
// ============================================================================

/// A named group of logger identifiers considered low-value
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct NoiseCategory {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Exact logger names
    #[serde(default)]
    pub loggers: Vec<String>,

    /// Logger name prefixes matched with starts-with
    #[serde(default)]
    pub prefixes: Vec<String>,
}

impl NoiseCategory {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_loggers<I, S>(mut self, loggers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.loggers = loggers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }
}

// ============================================================================
// Quota Types
// ============================================================================

/// Quota metadata reported by one response; absent headers stay `None`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Quota {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    pub reset_at: Option<DateTime<Utc>>,
}

impl Quota {
    pub fn is_empty(&self) -> bool {
        self.limit.is_none() && self.remaining.is_none() && self.reset_at.is_none()
    }
}

/// Snapshot of the remote quota, sent along with every batch
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatus {
    pub limit: u32,
    pub remaining: u32,

    /// Absolute reset time, serialized as unix milliseconds
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub reset_at: DateTime<Utc>,
}

// ============================================================================
// Control Protocol
// ============================================================================

/// Remote API credentials supplied by the client
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    /// Tenant base URL, e.g. `https://tenant.example.com`
    pub origin: String,
    pub api_key: String,
    pub api_secret: String,

    /// Extra headers attached to every request
    #[serde(default)]
    pub custom_headers: BTreeMap<String, String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("origin", &self.origin)
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .field("custom_headers", &self.custom_headers.keys())
            .finish()
    }
}

/// Messages sent by the viewer to its session
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Connect(Credentials),
    StartTail {
        sources: Vec<String>,
        #[serde(default)]
        poll_interval_seconds: Option<f64>,
        #[serde(default)]
        enabled_noise_category_ids: Option<Vec<String>>,
    },
    StopTail {},
    UpdateFilters {
        enabled_noise_category_ids: Vec<String>,
    },
}

/// Messages sent by a session to its viewer
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Connected {},
    Logs {
        logs: Vec<DisplayLogRecord>,
        rate_limit: RateLimitStatus,
        result_count: u64,
    },
    Error {
        error: String,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }
}
