//! Ports bound on each host, as reported through port events.
//!
//! Answers "does any other port on this host still use the network" when a
//! mapping is about to be torn down. A port is bound to at most one host per
//! network.

use redb::{ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::StateResult;
use crate::store::StateStore;
use crate::tables::BOUND_PORTS;
use crate::types::epoch_secs;

impl StateStore {
    /// Record `port_id` as bound on `host`, replacing any binding of the port
    /// to another host of the same network.
    pub fn record_port_binding(
        &self,
        host: &str,
        network_id: &str,
        port_id: &str,
    ) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(BOUND_PORTS).map_err(map_err!(Table))?;
            let stale = hosts_of_port(&table, network_id, port_id)?;
            for old_host in &stale {
                table
                    .remove((network_id, old_host.as_str(), port_id))
                    .map_err(map_err!(Write))?;
            }
            table
                .insert((network_id, host, port_id), epoch_secs())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%host, network = %network_id, port = %port_id, "port binding recorded");
        Ok(())
    }

    /// Forget `port_id` on every host of `network_id`. Returns whether a
    /// binding existed.
    pub fn clear_port_binding(&self, network_id: &str, port_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let found;
        {
            let mut table = txn.open_table(BOUND_PORTS).map_err(map_err!(Table))?;
            let hosts = hosts_of_port(&table, network_id, port_id)?;
            for host in &hosts {
                table
                    .remove((network_id, host.as_str(), port_id))
                    .map_err(map_err!(Write))?;
            }
            found = !hosts.is_empty();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        if found {
            debug!(network = %network_id, port = %port_id, "port binding cleared");
        }
        Ok(found)
    }

    /// Whether a port other than `excluding_port` is bound on
    /// `(host, network_id)`.
    pub fn other_ports_bound(
        &self,
        host: &str,
        network_id: &str,
        excluding_port: &str,
    ) -> StateResult<bool> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(BOUND_PORTS).map_err(map_err!(Table))?;
        for entry in table
            .range((network_id, host, "")..)
            .map_err(map_err!(Read))?
        {
            let (key, _) = entry.map_err(map_err!(Read))?;
            let (network, bound_host, port) = key.value();
            if network != network_id || bound_host != host {
                break;
            }
            if port != excluding_port {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// `(host, port_id)` pairs bound on `network_id`.
    pub fn bound_ports(&self, network_id: &str) -> StateResult<Vec<(String, String)>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(BOUND_PORTS).map_err(map_err!(Table))?;
        let mut ports = Vec::new();
        for entry in table
            .range((network_id, "", "")..)
            .map_err(map_err!(Read))?
        {
            let (key, _) = entry.map_err(map_err!(Read))?;
            let (network, host, port) = key.value();
            if network != network_id {
                break;
            }
            ports.push((host.to_string(), port.to_string()));
        }
        Ok(ports)
    }
}

/// Hosts `port_id` is bound to on `network_id`.
fn hosts_of_port<T>(table: &T, network_id: &str, port_id: &str) -> StateResult<Vec<String>>
where
    T: ReadableTable<(&'static str, &'static str, &'static str), u64>,
{
    let mut hosts = Vec::new();
    for entry in table
        .range((network_id, "", "")..)
        .map_err(map_err!(Read))?
    {
        let (key, _) = entry.map_err(map_err!(Read))?;
        let (network, host, port) = key.value();
        if network != network_id {
            break;
        }
        if port == port_id {
            hosts.push(host.to_string());
        }
    }
    Ok(hosts)
}
