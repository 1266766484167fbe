//! Error types for the fabricmap state store.

use thiserror::Error;

use crate::types::MappingStatus;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("{pool} id {id} is already in use")]
    AlreadyInUse { pool: String, id: u32 },

    #[error("{pool} id {id} is not in the pool")]
    NotInPool { pool: String, id: u32 },

    #[error("no free id left in pool {0}")]
    PoolExhausted(String),

    #[error("mapping for host {host} network {network_id} is {status}")]
    MappingConflict {
        host: String,
        network_id: String,
        status: MappingStatus,
    },

    #[error("invalid mapping transition: {0}")]
    InvalidTransition(String),

    #[error("transaction id {0} is already assigned to another mapping")]
    DuplicateTransaction(String),
}
