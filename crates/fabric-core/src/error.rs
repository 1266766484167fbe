//! Validation errors raised while loading configuration or converting
//! framework-supplied attributes.

use thiserror::Error;

/// Errors detected while validating configuration or segment attributes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {kind} range '{range}': {reason}")]
    InvalidRange {
        kind: String,
        range: String,
        reason: String,
    },

    #[error("invalid static mapping for host {host}: {reason}")]
    InvalidStaticMapping { host: String, reason: String },

    #[error("invalid segment: {0}")]
    InvalidSegment(String),

    #[error("failed to parse config: {0}")]
    Parse(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
