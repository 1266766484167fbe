//! Host agents as reported to the API.
//!
//! Agents report their configuration periodically. An agent that has not
//! reported within the down time is considered dead.

use std::collections::HashMap;
use std::time::Duration;

use fabricmap_binding::{AgentInfo, HostAgents};
use fabricmap_state::epoch_secs;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

/// Body of an agent report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentReport {
    pub agent_type: String,
    #[serde(default)]
    pub configurations: Value,
    #[serde(default = "default_true")]
    pub admin_state_up: bool,
}

fn default_true() -> bool {
    true
}

/// An agent as listed by the API.
#[derive(Debug, Clone, Serialize)]
pub struct RegisteredAgent {
    pub agent_type: String,
    pub configurations: Value,
    pub admin_state_up: bool,
    pub alive: bool,
    pub last_report: u64,
}

#[derive(Debug, Clone)]
struct Entry {
    configurations: Value,
    admin_state_up: bool,
    last_report: u64,
}

/// In-memory agent table keyed by `(host, agent_type)`.
pub struct AgentRegistry {
    agents: RwLock<HashMap<(String, String), Entry>>,
    down_time: Duration,
}

impl AgentRegistry {
    pub fn new(down_time: Duration) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            down_time,
        }
    }

    /// Record a report from an agent on `host`.
    pub fn report(&self, host: &str, report: AgentReport) {
        self.insert(host, report, epoch_secs());
    }

    fn insert(&self, host: &str, report: AgentReport, at: u64) {
        let key = (host.to_string(), report.agent_type);
        let entry = Entry {
            configurations: report.configurations,
            admin_state_up: report.admin_state_up,
            last_report: at,
        };
        if self.agents.write().insert(key.clone(), entry).is_none() {
            info!(host = %key.0, agent_type = %key.1, "agent registered");
        } else {
            debug!(host = %key.0, agent_type = %key.1, "agent report");
        }
    }

    /// Agents reported by `host`, sorted by type.
    pub fn host_agents(&self, host: &str) -> Vec<RegisteredAgent> {
        let now = epoch_secs();
        let mut agents: Vec<_> = self
            .agents
            .read()
            .iter()
            .filter(|((h, _), _)| h == host)
            .map(|((_, agent_type), e)| RegisteredAgent {
                agent_type: agent_type.clone(),
                configurations: e.configurations.clone(),
                admin_state_up: e.admin_state_up,
                alive: self.is_alive(e, now),
                last_report: e.last_report,
            })
            .collect();
        agents.sort_by(|a, b| a.agent_type.cmp(&b.agent_type));
        agents
    }

    fn is_alive(&self, entry: &Entry, now: u64) -> bool {
        now.saturating_sub(entry.last_report) <= self.down_time.as_secs()
    }
}

impl HostAgents for AgentRegistry {
    fn agents(&self, host: &str, agent_type: &str) -> Vec<AgentInfo> {
        let now = epoch_secs();
        self.agents
            .read()
            .get(&(host.to_string(), agent_type.to_string()))
            .map(|e| AgentInfo {
                configurations: e.configurations.clone(),
                alive: self.is_alive(e, now),
                admin_state_up: e.admin_state_up,
            })
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabricmap_binding::context::{DISCOVERY_AGENT_TYPE, OVS_AGENT_TYPE};
    use serde_json::json;

    fn discovery(ip: &str) -> AgentReport {
        AgentReport {
            agent_type: DISCOVERY_AGENT_TYPE.into(),
            configurations: json!({ "management_ip": ip }),
            admin_state_up: true,
        }
    }

    #[test]
    fn reported_agent_is_alive() {
        let registry = AgentRegistry::new(Duration::from_secs(75));
        registry.report("compute-1", discovery("10.0.0.11"));

        assert!(registry.is_agent_alive("compute-1", DISCOVERY_AGENT_TYPE));
        assert!(!registry.is_agent_alive("compute-1", OVS_AGENT_TYPE));
        assert!(!registry.is_agent_alive("compute-2", DISCOVERY_AGENT_TYPE));

        let agents = registry.agents("compute-1", DISCOVERY_AGENT_TYPE);
        assert_eq!(agents[0].configurations["management_ip"], json!("10.0.0.11"));
    }

    #[test]
    fn stale_agent_is_dead() {
        let registry = AgentRegistry::new(Duration::from_secs(75));
        registry.insert("compute-1", discovery("10.0.0.11"), 1000);

        assert!(!registry.is_agent_alive("compute-1", DISCOVERY_AGENT_TYPE));
        assert!(!registry.host_agents("compute-1")[0].alive);

        registry.report("compute-1", discovery("10.0.0.11"));
        assert!(registry.is_agent_alive("compute-1", DISCOVERY_AGENT_TYPE));
    }

    #[test]
    fn disabled_agent_is_not_usable() {
        let registry = AgentRegistry::new(Duration::from_secs(75));
        let mut report = discovery("10.0.0.11");
        report.admin_state_up = false;
        registry.report("compute-1", report);

        assert!(!registry.is_agent_alive("compute-1", DISCOVERY_AGENT_TYPE));
        assert_eq!(registry.agents("compute-1", DISCOVERY_AGENT_TYPE).len(), 1);
    }

    #[test]
    fn host_agents_sorted_by_type() {
        let registry = AgentRegistry::new(Duration::from_secs(75));
        registry.report(
            "compute-1",
            AgentReport {
                agent_type: OVS_AGENT_TYPE.into(),
                configurations: json!({ "bridge_mappings": { "physnet1": "br-eth1" } }),
                admin_state_up: true,
            },
        );
        registry.report("compute-1", discovery("10.0.0.11"));
        registry.report("compute-2", discovery("10.0.0.12"));

        let types: Vec<_> = registry
            .host_agents("compute-1")
            .into_iter()
            .map(|a| a.agent_type)
            .collect();
        assert_eq!(types, vec![DISCOVERY_AGENT_TYPE, OVS_AGENT_TYPE]);
    }
}
