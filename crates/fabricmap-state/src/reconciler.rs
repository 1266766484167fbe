//! Applies SDN transaction completions to the mapping state machine.

use tracing::{debug, info, warn};

use crate::error::StateResult;
use crate::locks::MAPPING_LOCK;
use crate::mapping::{read_mapping, write_mapping};
use crate::store::StateStore;
use crate::tables::{HOST_NETWORK_MAPPINGS, MAPPING_TRANSACTIONS};
use crate::types::{MappingStatus, ReconcileSummary};

impl StateStore {
    /// Mark the given transactions as completed.
    ///
    /// CREATING mappings become ACTIVE and DELETING mappings are removed.
    /// Ids that match no in-flight mapping are ignored.
    pub fn transactions_done<I, S>(&self, tx_ids: I) -> StateResult<ReconcileSummary>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tx_ids: Vec<S> = tx_ids.into_iter().collect();
        if tx_ids.is_empty() {
            return Ok(ReconcileSummary::default());
        }

        let summary = self.locks().with(MAPPING_LOCK, || -> StateResult<_> {
            let mut summary = ReconcileSummary::default();
            let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
            {
                let mut mappings = txn.open_table(HOST_NETWORK_MAPPINGS).map_err(map_err!(Table))?;
                let mut index = txn.open_table(MAPPING_TRANSACTIONS).map_err(map_err!(Table))?;

                for tx_id in &tx_ids {
                    let tx_id = tx_id.as_ref();
                    let owner = index
                        .remove(tx_id)
                        .map_err(map_err!(Write))?
                        .map(|guard| {
                            let (host, network_id) = guard.value();
                            (host.to_string(), network_id.to_string())
                        });
                    let Some((host, network_id)) = owner else {
                        debug!(%tx_id, "unknown transaction, ignoring");
                        continue;
                    };
                    let Some(mut mapping) = read_mapping(&mappings, &host, &network_id)? else {
                        warn!(%tx_id, %host, network = %network_id, "transaction index points to a missing mapping");
                        continue;
                    };

                    match mapping.status {
                        MappingStatus::Creating => {
                            mapping.status = MappingStatus::Active;
                            mapping.tx_id = None;
                            write_mapping(&mut mappings, &mapping)?;
                            summary.activated += 1;
                            info!(%tx_id, %host, network = %network_id, "mapping active");
                        }
                        MappingStatus::Deleting => {
                            mappings
                                .remove((host.as_str(), network_id.as_str()))
                                .map_err(map_err!(Write))?;
                            summary.deleted += 1;
                            info!(%tx_id, %host, network = %network_id, "mapping removed");
                        }
                        status => {
                            warn!(%tx_id, %host, network = %network_id, %status, "completed transaction for idle mapping");
                        }
                    }
                }
            }
            txn.commit().map_err(map_err!(Transaction))?;
            Ok(summary)
        })?;

        Ok(summary)
    }
}
