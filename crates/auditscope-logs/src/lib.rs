//! Log processing for auditscope
//!
//! This crate turns raw records from the remote log API into display records,
//! classifies noisy loggers, and tracks the remote quota to pace polling.

mod message;
mod noise;
mod normalize;
mod ratelimit;

pub use message::{clean_dn, MessageExtractor, MAX_MESSAGE_CHARS};
pub use noise::{CatalogError, NoiseCatalog, NoiseClassifier};
pub use normalize::LogNormalizer;
pub use ratelimit::RateLimiter;

// Re-export types used in our public API
pub use auditscope_types::{DisplayLogRecord, NoiseCategory, Quota, RateLimitStatus, RawLogRecord};
