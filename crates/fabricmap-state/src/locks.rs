//! Process-wide named locks.
//!
//! A registry of mutexes keyed by name, created on first use and kept for the
//! life of the process. Locks are reentrant: a port hook called while the
//! framework holds `ports/<net>` on the same thread may take it again.
//!
//! Lock order: any `ports/<net>` lock before [`MAPPING_LOCK`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};

/// Serializes every read-modify-write of host/network mappings.
pub const MAPPING_LOCK: &str = "mapping";

/// Lock the framework takes while creating or deleting ports of a network.
pub fn ports_lock(network_id: &str) -> String {
    format!("ports/{network_id}")
}

/// Lock held while looking up or allocating dynamic segments of a network.
pub fn segment_lock(network_id: &str) -> String {
    format!("segments/{network_id}")
}

/// Lock held while reconciling an identifier pool.
pub fn pool_lock(pool: &str) -> String {
    format!("pool/{pool}")
}

#[derive(Default)]
pub struct NamedLocks {
    locks: Mutex<HashMap<String, Arc<ReentrantMutex<()>>>>,
}

impl NamedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock called `name`.
    pub fn with<T>(&self, name: &str, f: impl FnOnce() -> T) -> T {
        let lock = {
            let mut locks = self.locks.lock();
            locks
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(ReentrantMutex::new(())))
                .clone()
        };
        let _guard = lock.lock();
        f()
    }

    /// Number of distinct names ever locked.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
