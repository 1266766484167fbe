//! Error types for the binding layer.

use fabric_core::ConfigError;
use fabricmap_sdn::SdnError;
use fabricmap_state::StateError;
use thiserror::Error;

pub type BindingResult<T> = Result<T, BindingError>;

#[derive(Debug, Error)]
pub enum BindingError {
    #[error("no valid mappings for host {host}")]
    NoValidMappings { host: String },

    #[error("no valid mappings for host {host} and physnet {physnet}")]
    NoValidMappingsPhysnet { host: String, physnet: String },

    #[error("no bridge name for host {host}, physnet {physnet}")]
    NoBridgeName { host: String, physnet: String },

    #[error("no management IP for host {host}")]
    NoMgmtIP { host: String },

    #[error(transparent)]
    InvalidSegment(#[from] ConfigError),

    #[error("cannot allocate dynamic segment for port {port_id} on network {network_id}")]
    NoDynamicSegment { port_id: String, network_id: String },

    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("SDN error: {0}")]
    Sdn(#[from] SdnError),
}
