//! fabricmap-state — durable state for the fabric mapping controller.
//!
//! Backed by [redb](https://docs.rs/redb). Holds the identifier pools, the
//! host/network mapping state machine, the dynamic topology learned from
//! discovery agents, dynamic VLAN segments, the ports bound on each host and
//! the SDN registration id.
//!
//! # Concurrency
//!
//! Every read-modify-write runs in a single redb write transaction. redb
//! allows one writer at a time, so a write transaction behaves like a lock on
//! every row it reads. Operations that must also serialize with work outside
//! the store (the framework's port bookkeeping, in-flight SDN calls) take a
//! named lock from [`NamedLocks`] first.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` and can be shared across
//! threads and async tasks.

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| $crate::error::StateError::$variant(e.to_string())
    };
}

pub mod allocator;
pub mod error;
pub mod locks;
pub mod mapping;
pub mod ports;
pub mod reconciler;
pub mod segments;
pub mod store;
pub mod tables;
pub mod topology;
pub mod types;

pub use allocator::{IdAllocator, PoolKind};
pub use error::{StateError, StateResult};
pub use locks::NamedLocks;
pub use mapping::{MappingClaim, MappingOutcome};
pub use segments::DynamicSegments;
pub use store::StateStore;
pub use types::*;
