use std::time::Duration;

use thiserror::Error;

pub type SdnResult<T> = Result<T, SdnError>;

#[derive(Debug, Error)]
pub enum SdnError {
    #[error("invalid SDN url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to connect to SDN controller: {0}")]
    Connect(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("SDN request timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("unexpected HTTP status {status} on {method} {url}")]
    Status {
        method: String,
        url: String,
        status: u16,
    },

    #[error("failed to decode SDN response: {0}")]
    Decode(String),

    #[error("SDN accepted {0} without returning a transaction id")]
    MissingTransactionId(String),
}
