//! Error kinds surfaced by the radar core
//!
//! The fatal/transient split is carried by the variant, not decided at the
//! call site: pollers retry transient errors on the next tick and stop on
//! fatal ones.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RadarError {
    /// Missing credentials, unknown bot id, invalid tunable. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Reading the operation log (or profiles) failed. Transient.
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// Writing a signal failed after all retries. Transient.
    #[error("publish failed: {0}")]
    Publish(String),

    /// A stored row could not be interpreted; the row is skipped.
    #[error("malformed row {row_id}: {message}")]
    Data { row_id: i64, message: String },

    /// Gate invariant violated. Fatal for the bot.
    #[error("internal assertion failed: {0}")]
    InternalAssertion(String),
}

impl RadarError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, RadarError::Config(_) | RadarError::InternalAssertion(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RadarError::Config(_) => "ConfigError",
            RadarError::Fetch(_) => "FetchError",
            RadarError::Publish(_) => "PublishError",
            RadarError::Data { .. } => "DataError",
            RadarError::InternalAssertion(_) => "InternalAssertionError",
        }
    }
}

pub type RadarResult<T> = Result<T, RadarError>;
