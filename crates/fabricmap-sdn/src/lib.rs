//! fabricmap-sdn — client for the SDN fabric controller REST API.
//!
//! All endpoints live under `network/v1.0/`. Creates and deletes are
//! asynchronous on the controller side: they answer `202 Accepted` with a
//! `Location` header whose last path segment is the transaction id, and the
//! transaction is later polled through `transaction/<id>/<tx,...>`.
//!
//! Both `http` and `https` controller URLs are supported; see [`tls`] for
//! certificate verification options.

pub mod client;
pub mod error;
pub mod tls;
pub mod types;

pub use client::SdnClient;
pub use error::{SdnError, SdnResult};
pub use types::{NetworkRequest, PortBinding, SwitchPortBinding, TransactionStatus};
