//! Dynamic topology learned from discovery agents.
//!
//! Each row records which host and physnet sit behind a `(switch, port)`. A
//! physnet is usable only while every one of its ports keeps being reported,
//! so a bond with one silent member is left out entirely.

use std::collections::BTreeMap;

use fabric_core::topology::{PhysnetPorts, SwitchPort};
use redb::{ReadableDatabase, ReadableTable};
use tracing::{debug, info};

use crate::error::StateResult;
use crate::store::StateStore;
use crate::tables::SWITCH_DYNAMIC_MAPPINGS;
use crate::types::{epoch_secs, SwitchDynamicMapping};

impl StateStore {
    /// Record a topology report from the discovery agent of `host`.
    pub fn update_dynamic_mappings(&self, host: &str, report: &PhysnetPorts) -> StateResult<u32> {
        self.update_dynamic_mappings_at(host, report, epoch_secs())
    }

    /// [`Self::update_dynamic_mappings`] with an explicit clock.
    ///
    /// Every reported port is upserted with `last_update = now`; a port
    /// previously attributed to another host or physnet is reassigned.
    pub fn update_dynamic_mappings_at(
        &self,
        host: &str,
        report: &PhysnetPorts,
        now: u64,
    ) -> StateResult<u32> {
        let mut updated = 0;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SWITCH_DYNAMIC_MAPPINGS).map_err(map_err!(Table))?;
            for (physnet, ports) in report {
                for (switch, port) in ports {
                    let row = SwitchDynamicMapping {
                        switch: switch.clone(),
                        port: port.clone(),
                        host: host.to_string(),
                        physnet: physnet.clone(),
                        last_update: now,
                    };
                    let value = serde_json::to_vec(&row).map_err(map_err!(Serialize))?;
                    table
                        .insert((switch.as_str(), port.as_str()), value.as_slice())
                        .map_err(map_err!(Write))?;
                    updated += 1;
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%host, ports = updated, "dynamic mappings updated");
        Ok(updated)
    }

    /// Forget everything learned about `host`. Returns the number of rows removed.
    pub fn drop_dynamic_mappings(&self, host: &str) -> StateResult<u32> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let removed;
        {
            let mut table = txn.open_table(SWITCH_DYNAMIC_MAPPINGS).map_err(map_err!(Table))?;
            let keys: Vec<SwitchPort> = read_rows(&table)?
                .into_iter()
                .filter(|row| row.host == host)
                .map(|row| (row.switch, row.port))
                .collect();
            for (switch, port) in &keys {
                table
                    .remove((switch.as_str(), port.as_str()))
                    .map_err(map_err!(Write))?;
            }
            removed = keys.len() as u32;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        info!(%host, removed, "dynamic mappings dropped");
        Ok(removed)
    }

    /// Fresh topology of `host`, grouped by physnet.
    pub fn dynamic_mappings_for_host(
        &self,
        host: &str,
        max_age: u64,
        exclude_physnets: &[String],
    ) -> StateResult<PhysnetPorts> {
        self.dynamic_mappings_for_host_at(host, max_age, exclude_physnets, epoch_secs())
    }

    /// [`Self::dynamic_mappings_for_host`] with an explicit clock.
    ///
    /// A physnet is included only when all of its ports were reported within
    /// `max_age` seconds of `now`.
    pub fn dynamic_mappings_for_host_at(
        &self,
        host: &str,
        max_age: u64,
        exclude_physnets: &[String],
        now: u64,
    ) -> StateResult<PhysnetPorts> {
        let mut grouped: BTreeMap<String, (bool, Vec<SwitchPort>)> = BTreeMap::new();
        for row in self.list_dynamic_mappings(host)? {
            if exclude_physnets.contains(&row.physnet) {
                continue;
            }
            let fresh = row.is_fresh(max_age, now);
            let entry = grouped.entry(row.physnet).or_insert((true, Vec::new()));
            entry.0 &= fresh;
            entry.1.push((row.switch, row.port));
        }

        let result: PhysnetPorts = grouped
            .into_iter()
            .filter_map(|(physnet, (all_fresh, ports))| {
                if !all_fresh {
                    debug!(%host, %physnet, "physnet has stale ports, skipping");
                    return None;
                }
                Some((physnet, ports.into_iter().collect()))
            })
            .collect();
        Ok(result)
    }

    /// Raw rows for `host`, fresh or not.
    pub fn list_dynamic_mappings(&self, host: &str) -> StateResult<Vec<SwitchDynamicMapping>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SWITCH_DYNAMIC_MAPPINGS).map_err(map_err!(Table))?;
        Ok(read_rows(&table)?
            .into_iter()
            .filter(|row| row.host == host)
            .collect())
    }
}

fn read_rows<T>(table: &T) -> StateResult<Vec<SwitchDynamicMapping>>
where
    T: ReadableTable<(&'static str, &'static str), &'static [u8]>,
{
    let mut rows = Vec::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (_, value) = entry.map_err(map_err!(Read))?;
        let row: SwitchDynamicMapping =
            serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
        rows.push(row);
    }
    Ok(rows)
}
