//! What the orchestration framework hands to the driver, and what the
//! driver may ask the framework in return.

use fabric_core::segment::SEGMENT_ID;
use fabric_core::SegmentAttrs;
use fabricmap_state::StateStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Agent type reported by the LLDP discovery agent.
pub const DISCOVERY_AGENT_TYPE: &str = "Fabric discovery agent";

/// Agent type reported by the Open vSwitch agent.
pub const OVS_AGENT_TYPE: &str = "Open vSwitch agent";

/// One level of a port binding: the segment bound at that level.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BindingLevel {
    pub segment: SegmentAttrs,
}

/// A port update or delete event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortContext {
    pub port_id: String,
    pub network_id: String,
    /// Segments of the port's network. The first one decides whether the
    /// fabric handles the network.
    pub network_segments: Vec<SegmentAttrs>,
    pub host: Option<String>,
    pub original_host: Option<String>,
    pub binding_levels: Vec<BindingLevel>,
    pub original_binding_levels: Vec<BindingLevel>,
    /// Segments still to be bound during `bind_port`.
    pub segments_to_bind: Vec<SegmentAttrs>,
}

impl PortContext {
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref().filter(|h| !h.is_empty())
    }

    pub fn original_host(&self) -> Option<&str> {
        self.original_host.as_deref().filter(|h| !h.is_empty())
    }

    pub fn top_bound_segment(&self) -> Option<&SegmentAttrs> {
        self.binding_levels.first().map(|l| &l.segment)
    }

    pub fn bottom_bound_segment(&self) -> Option<&SegmentAttrs> {
        self.binding_levels.last().map(|l| &l.segment)
    }

    pub fn original_top_bound_segment(&self) -> Option<&SegmentAttrs> {
        self.original_binding_levels.first().map(|l| &l.segment)
    }

    pub fn original_bottom_bound_segment(&self) -> Option<&SegmentAttrs> {
        self.original_binding_levels.last().map(|l| &l.segment)
    }
}

/// Framework identifier of a segment, as a string.
pub fn segment_id(segment: &SegmentAttrs) -> Option<String> {
    match segment.get(SEGMENT_ID)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// An agent registered for a host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    /// Free-form agent configuration (`management_ip`, `bridge_mappings`, ...).
    pub configurations: Value,
    pub alive: bool,
    pub admin_state_up: bool,
}

/// Agent lookup provided by the framework.
pub trait HostAgents: Send + Sync {
    fn agents(&self, host: &str, agent_type: &str) -> Vec<AgentInfo>;

    /// Whether an agent of `agent_type` is alive and enabled on `host`.
    fn is_agent_alive(&self, host: &str, agent_type: &str) -> bool {
        self.agents(host, agent_type)
            .iter()
            .any(|a| a.alive && a.admin_state_up)
    }
}

/// Port bookkeeping provided by the framework.
pub trait PortInventory: Send + Sync {
    /// Whether a port other than `excluding_port` is bound on
    /// `(host, network_id)`. Failed or unbound ports and DVR interfaces do
    /// not count.
    fn other_ports_exist(&self, host: &str, network_id: &str, excluding_port: &str) -> bool;
}

/// Port bookkeeping recorded in the state store from port events.
///
/// A store error counts as "other ports exist" so the mapping is kept.
impl PortInventory for StateStore {
    fn other_ports_exist(&self, host: &str, network_id: &str, excluding_port: &str) -> bool {
        self.other_ports_bound(host, network_id, excluding_port)
            .unwrap_or_else(|e| {
                warn!(%host, network = %network_id, error = %e, "bound port lookup failed");
                true
            })
    }
}
