//! Domain types persisted by the fabricmap state store.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// ── Mappings ───────────────────────────────────────────────────────

/// Lifecycle of a host/network attachment on the fabric.
///
/// `NEW → CREATING → ACTIVE → DELETE → DELETING → (removed)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MappingStatus {
    /// Requested, not yet sent to the SDN backend.
    New,
    /// Create submitted, waiting for the transaction to complete.
    Creating,
    Active,
    /// Teardown requested, not yet sent.
    Delete,
    /// Delete submitted, waiting for the transaction to complete.
    Deleting,
}

impl MappingStatus {
    /// Statuses that must carry a transaction id.
    pub fn has_transaction(self) -> bool {
        matches!(self, MappingStatus::Creating | MappingStatus::Deleting)
    }
}

impl fmt::Display for MappingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MappingStatus::New => "NEW",
            MappingStatus::Creating => "CREATING",
            MappingStatus::Active => "ACTIVE",
            MappingStatus::Delete => "DELETE",
            MappingStatus::Deleting => "DELETING",
        };
        f.write_str(s)
    }
}

/// A host/network attachment and its provisioning state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostNetworkMapping {
    pub host: String,
    pub network_id: String,
    pub status: MappingStatus,
    /// Set iff `status` is CREATING or DELETING.
    pub tx_id: Option<String>,
}

impl HostNetworkMapping {
    pub fn new(host: &str, network_id: &str) -> Self {
        Self {
            host: host.to_string(),
            network_id: network_id.to_string(),
            status: MappingStatus::New,
            tx_id: None,
        }
    }
}

/// Counts applied by one reconciler pass.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub activated: u32,
    pub deleted: u32,
}

// ── Identifier pools ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdAllocation {
    pub pool: String,
    pub id: u32,
    pub allocated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolStats {
    pub pool: String,
    /// Rows present in the pool, allocated or not.
    pub total: u64,
    pub allocated: u64,
}

/// Row changes made while bringing a pool in line with its ranges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolSyncStats {
    pub inserted: u64,
    pub removed: u64,
}

// ── Topology ───────────────────────────────────────────────────────

/// One switch port learned from a discovery agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SwitchDynamicMapping {
    pub switch: String,
    pub port: String,
    pub host: String,
    pub physnet: String,
    /// Unix timestamp (seconds) of the last report naming this port.
    pub last_update: u64,
}

impl SwitchDynamicMapping {
    pub fn is_fresh(&self, max_age: u64, now: u64) -> bool {
        now.saturating_sub(self.last_update) <= max_age
    }
}

// ── Dynamic segments ───────────────────────────────────────────────

/// A VLAN carrying an ISID network on one physnet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DynamicSegment {
    pub network_id: String,
    pub physnet: String,
    pub vlan: u32,
    pub mtu: u32,
}

pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
