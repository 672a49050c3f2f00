//! Remote log API client for auditscope
//!
//! This crate talks to the identity platform's log tail endpoint: it attaches
//! the API key pair, follows pagination cookies, reads quota headers, and maps
//! every failure onto [`ApiError`] so callers can tell cancellation and rate
//! limiting apart from ordinary errors.

mod client;
mod error;
mod tailer;

pub use client::{quota_from_headers, ClientOptions, HttpTailerFactory, LogApiClient};
pub use error::{ApiError, ApiResult};
pub use tailer::{LogTailer, TailPage, TailRequest, TailerFactory};

// Re-export types that are used in our public API
pub use auditscope_types::{Credentials, Quota, RawLogRecord};
