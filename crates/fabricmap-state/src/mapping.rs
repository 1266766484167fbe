//! Host/network mapping state machine.
//!
//! ```text
//! try_create ──► NEW ──claim+commit──► CREATING ──reconciler──► ACTIVE
//!                                                                 │
//!        (removed) ◄──reconciler── DELETING ◄──claim+commit── DELETE ◄── try_delete
//! ```
//!
//! Every read-modify-write takes [`MAPPING_LOCK`] and runs in one write
//! transaction. Deletes take the network's ports lock first. SDN calls happen between [`StateStore::begin_processing`] and
//! [`MappingClaim::commit`] with no lock held.

use redb::{ReadableDatabase, ReadableTable, Table};
use tracing::{debug, info, warn};

use crate::error::{StateError, StateResult};
use crate::locks::{ports_lock, MAPPING_LOCK};
use crate::store::StateStore;
use crate::tables::{HOST_NETWORK_MAPPINGS, MAPPING_TRANSACTIONS};
use crate::types::{HostNetworkMapping, MappingStatus};

type MappingTable<'txn> = Table<'txn, (&'static str, &'static str), &'static [u8]>;

pub(crate) fn read_mapping<T>(
    table: &T,
    host: &str,
    network_id: &str,
) -> StateResult<Option<HostNetworkMapping>>
where
    T: ReadableTable<(&'static str, &'static str), &'static [u8]>,
{
    match table.get((host, network_id)).map_err(map_err!(Read))? {
        Some(guard) => {
            let mapping: HostNetworkMapping =
                serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
            Ok(Some(mapping))
        }
        None => Ok(None),
    }
}

pub(crate) fn write_mapping(
    table: &mut MappingTable<'_>,
    mapping: &HostNetworkMapping,
) -> StateResult<()> {
    let value = serde_json::to_vec(mapping).map_err(map_err!(Serialize))?;
    table
        .insert(
            (mapping.host.as_str(), mapping.network_id.as_str()),
            value.as_slice(),
        )
        .map_err(map_err!(Write))?;
    Ok(())
}

impl MappingStatus {
    /// Transitions a claim may commit. Staying put is always allowed.
    pub fn can_become(self, next: MappingStatus) -> bool {
        use MappingStatus::*;
        self == next
            || matches!(
                (self, next),
                (New, Creating) | (Creating, Active) | (Active, Delete) | (Delete, Deleting)
            )
    }
}

/// Result of processing a claimed mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingOutcome {
    pub status: MappingStatus,
    pub tx_id: Option<String>,
}

impl MappingOutcome {
    pub fn unchanged(status: MappingStatus) -> Self {
        Self {
            status,
            tx_id: None,
        }
    }

    pub fn creating(tx_id: impl Into<String>) -> Self {
        Self {
            status: MappingStatus::Creating,
            tx_id: Some(tx_id.into()),
        }
    }

    pub fn deleting(tx_id: impl Into<String>) -> Self {
        Self {
            status: MappingStatus::Deleting,
            tx_id: Some(tx_id.into()),
        }
    }
}

/// Exclusive right to move one mapping out of its `expected` status.
///
/// Held between the status check and the persistence of the SDN outcome.
/// Dropping the claim without committing leaves the mapping untouched.
#[must_use = "a claim does nothing unless committed"]
pub struct MappingClaim {
    store: StateStore,
    key: (String, String),
    expected: MappingStatus,
}

impl MappingClaim {
    pub fn host(&self) -> &str {
        &self.key.0
    }

    pub fn network_id(&self) -> &str {
        &self.key.1
    }

    pub fn expected(&self) -> MappingStatus {
        self.expected
    }

    /// Persist `outcome` if the mapping is still in the expected status.
    ///
    /// Returns `false` when the mapping changed or vanished meanwhile; the
    /// outcome is discarded in that case.
    pub fn commit(self, outcome: MappingOutcome) -> StateResult<bool> {
        if outcome.status.has_transaction() != outcome.tx_id.is_some() {
            return Err(StateError::InvalidTransition(format!(
                "{} requires {} transaction id",
                outcome.status,
                if outcome.status.has_transaction() { "a" } else { "no" }
            )));
        }
        if !self.expected.can_become(outcome.status) {
            return Err(StateError::InvalidTransition(format!(
                "{} -> {}",
                self.expected, outcome.status
            )));
        }

        let (host, network_id) = (self.host(), self.network_id());
        self.store.locks().with(MAPPING_LOCK, || {
            let txn = self.store.db.begin_write().map_err(map_err!(Transaction))?;
            {
                let mut table = txn.open_table(HOST_NETWORK_MAPPINGS).map_err(map_err!(Table))?;
                let mut index = txn.open_table(MAPPING_TRANSACTIONS).map_err(map_err!(Table))?;

                let Some(mut mapping) = read_mapping(&table, host, network_id)? else {
                    debug!(%host, network = %network_id, "mapping vanished, dropping outcome");
                    return Ok(false);
                };
                if mapping.status != self.expected {
                    debug!(
                        %host,
                        network = %network_id,
                        expected = %self.expected,
                        actual = %mapping.status,
                        "mapping changed, dropping outcome"
                    );
                    return Ok(false);
                }

                if let Some(tx_id) = &outcome.tx_id {
                    let owner = index
                        .get(tx_id.as_str())
                        .map_err(map_err!(Read))?
                        .map(|guard| {
                            let (h, n) = guard.value();
                            (h.to_string(), n.to_string())
                        });
                    if owner.is_some_and(|(h, n)| h != host || n != network_id) {
                        return Err(StateError::DuplicateTransaction(tx_id.clone()));
                    }
                }
                if let Some(old) = &mapping.tx_id {
                    index.remove(old.as_str()).map_err(map_err!(Write))?;
                }
                if let Some(tx_id) = &outcome.tx_id {
                    index
                        .insert(tx_id.as_str(), (host, network_id))
                        .map_err(map_err!(Write))?;
                }

                mapping.status = outcome.status;
                mapping.tx_id = outcome.tx_id.clone();
                write_mapping(&mut table, &mapping)?;
            }
            txn.commit().map_err(map_err!(Transaction))?;
            info!(
                %host,
                network = %network_id,
                status = %outcome.status,
                tx_id = ?outcome.tx_id,
                "mapping updated"
            );
            Ok(true)
        })
    }
}

impl Drop for MappingClaim {
    fn drop(&mut self) {
        self.store.claims.lock().remove(&self.key);
    }
}

impl StateStore {
    /// Record that `host` needs `network_id`.
    ///
    /// Returns `true` when a NEW mapping was created, `false` when one
    /// already exists. A mapping being torn down is a conflict.
    pub fn try_create_mapping(&self, host: &str, network_id: &str) -> StateResult<bool> {
        self.locks().with(MAPPING_LOCK, || {
            let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
            {
                let mut table = txn.open_table(HOST_NETWORK_MAPPINGS).map_err(map_err!(Table))?;
                if let Some(existing) = read_mapping(&table, host, network_id)? {
                    return match existing.status {
                        MappingStatus::Delete | MappingStatus::Deleting => {
                            Err(StateError::MappingConflict {
                                host: host.to_string(),
                                network_id: network_id.to_string(),
                                status: existing.status,
                            })
                        }
                        _ => Ok(false),
                    };
                }
                write_mapping(&mut table, &HostNetworkMapping::new(host, network_id))?;
            }
            txn.commit().map_err(map_err!(Transaction))?;
            info!(%host, network = %network_id, "mapping created");
            Ok(true)
        })
    }

    /// Request teardown of the mapping once `port_id` goes away.
    ///
    /// `other_ports_exist` runs under the `ports/<network_id>` lock and must
    /// report whether another port on `(host, network_id)` still needs the
    /// mapping. Returns `true` when the mapping moved ACTIVE → DELETE.
    ///
    /// May be called while the caller already holds `ports/<network_id>` on
    /// the same thread.
    pub fn try_delete_mapping(
        &self,
        host: &str,
        network_id: &str,
        port_id: &str,
        other_ports_exist: impl FnOnce() -> bool,
    ) -> StateResult<bool> {
        self.locks().with(&ports_lock(network_id), || {
            self.locks().with(MAPPING_LOCK, || {
                let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
                {
                    let mut table =
                        txn.open_table(HOST_NETWORK_MAPPINGS).map_err(map_err!(Table))?;
                    let Some(mut mapping) = read_mapping(&table, host, network_id)? else {
                        return Ok(false);
                    };
                    if other_ports_exist() {
                        debug!(
                            %host,
                            network = %network_id,
                            port = %port_id,
                            "other ports still use the mapping"
                        );
                        return Ok(false);
                    }
                    match mapping.status {
                        MappingStatus::Active => {}
                        MappingStatus::Delete | MappingStatus::Deleting => return Ok(false),
                        MappingStatus::New | MappingStatus::Creating => {
                            warn!(
                                %host,
                                network = %network_id,
                                port = %port_id,
                                status = %mapping.status,
                                "delete raced ahead of create"
                            );
                            return Err(StateError::MappingConflict {
                                host: host.to_string(),
                                network_id: network_id.to_string(),
                                status: mapping.status,
                            });
                        }
                    }
                    mapping.status = MappingStatus::Delete;
                    write_mapping(&mut table, &mapping)?;
                }
                txn.commit().map_err(map_err!(Transaction))?;
                info!(%host, network = %network_id, port = %port_id, "mapping marked for delete");
                Ok(true)
            })
        })
    }

    /// Claim the mapping if it is in `expected` status.
    ///
    /// Returns `None` when the mapping is absent, in another status, or
    /// already claimed by a concurrent processor.
    pub fn begin_processing(
        &self,
        host: &str,
        network_id: &str,
        expected: MappingStatus,
    ) -> StateResult<Option<MappingClaim>> {
        self.locks().with(MAPPING_LOCK, || {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(HOST_NETWORK_MAPPINGS).map_err(map_err!(Table))?;
            let status = read_mapping(&table, host, network_id)?.map(|m| m.status);
            if status != Some(expected) {
                debug!(
                    %host,
                    network = %network_id,
                    %expected,
                    actual = ?status,
                    "mapping not in expected status, skipping"
                );
                return Ok(None);
            }

            let key = (host.to_string(), network_id.to_string());
            if !self.claims.lock().insert(key.clone()) {
                debug!(%host, network = %network_id, "mapping already being processed");
                return Ok(None);
            }
            Ok(Some(MappingClaim {
                store: self.clone(),
                key,
                expected,
            }))
        })
    }

    /// Claim, let `f` fill in the outcome, and commit it.
    pub fn process_mapping(
        &self,
        host: &str,
        network_id: &str,
        expected: MappingStatus,
        f: impl FnOnce(&mut MappingOutcome),
    ) -> StateResult<bool> {
        let Some(claim) = self.begin_processing(host, network_id, expected)? else {
            return Ok(false);
        };
        let mut outcome = MappingOutcome::unchanged(expected);
        f(&mut outcome);
        claim.commit(outcome)
    }

    pub fn get_mapping(
        &self,
        host: &str,
        network_id: &str,
    ) -> StateResult<Option<HostNetworkMapping>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(HOST_NETWORK_MAPPINGS).map_err(map_err!(Table))?;
        read_mapping(&table, host, network_id)
    }

    /// List all mappings.
    pub fn list_mappings(&self) -> StateResult<Vec<HostNetworkMapping>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(HOST_NETWORK_MAPPINGS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let mapping: HostNetworkMapping =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(mapping);
        }
        Ok(results)
    }

    /// Transaction ids of every CREATING or DELETING mapping.
    pub fn in_flight_transactions(&self) -> StateResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(MAPPING_TRANSACTIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            results.push(key.value().to_string());
        }
        Ok(results)
    }
}
