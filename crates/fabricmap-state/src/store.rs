//! StateStore — redb-backed state persistence for fabricmap.
//!
//! The store owns the database handle, the named-lock registry and the set of
//! in-flight mapping claims. Domain operations live in sibling modules as
//! further `impl StateStore` blocks.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::{debug, error, info};

use crate::error::StateResult;
use crate::locks::{ports_lock, NamedLocks};
use crate::tables::*;

const REGISTRATION_KEY: &str = "openstack_id";

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    pub(crate) db: Arc<Database>,
    locks: Arc<NamedLocks>,
    /// `(host, network_id)` pairs currently between claim and commit.
    pub(crate) claims: Arc<Mutex<HashSet<(String, String)>>>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::with_database(db);
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::with_database(db);
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn with_database(db: Database) -> Self {
        Self {
            db: Arc::new(db),
            locks: Arc::new(NamedLocks::new()),
            claims: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;
        txn.open_table(HOST_NETWORK_MAPPINGS).map_err(map_err!(Table))?;
        txn.open_table(MAPPING_TRANSACTIONS).map_err(map_err!(Table))?;
        txn.open_table(SWITCH_DYNAMIC_MAPPINGS).map_err(map_err!(Table))?;
        txn.open_table(DYNAMIC_SEGMENTS).map_err(map_err!(Table))?;
        txn.open_table(BOUND_PORTS).map_err(map_err!(Table))?;
        txn.open_table(REGISTRATION).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// The named-lock registry shared with the framework.
    pub fn locks(&self) -> &NamedLocks {
        &self.locks
    }

    /// Run `f` under the `ports/<network_id>` lock.
    pub fn with_ports_lock<T>(&self, network_id: &str, f: impl FnOnce() -> T) -> T {
        self.locks.with(&ports_lock(network_id), f)
    }

    // ── SDN registration ───────────────────────────────────────────

    /// The registration id stored by the first worker that registered.
    pub fn registration_id(&self) -> StateResult<Option<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(REGISTRATION).map_err(map_err!(Table))?;
        let id = table
            .get(REGISTRATION_KEY)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value().to_string());
        Ok(id)
    }

    /// Persist `id` unless one is already stored. Returns the id in effect.
    pub fn store_registration_id(&self, id: &str) -> StateResult<String> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let effective = {
            let mut table = txn.open_table(REGISTRATION).map_err(map_err!(Table))?;
            let existing = table
                .get(REGISTRATION_KEY)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_string());
            match existing {
                Some(existing) => {
                    if existing != id {
                        error!(
                            stored = %existing,
                            received = %id,
                            "SDN returned a different registration id, keeping the stored one"
                        );
                    }
                    existing
                }
                None => {
                    table
                        .insert(REGISTRATION_KEY, id)
                        .map_err(map_err!(Write))?;
                    info!(%id, "SDN registration id stored");
                    id.to_string()
                }
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(effective)
    }
}
