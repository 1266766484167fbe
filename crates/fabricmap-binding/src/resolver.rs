//! Fills in the host-side details of a fabric mapping: switch ports,
//! management address and OVS bridge.

use std::collections::BTreeSet;
use std::sync::Arc;

use fabric_core::{FabricConfig, FabricMapping, PhysnetPorts, StaticMappings, SwitchPort};
use fabricmap_state::StateStore;
use serde_json::Value;
use tracing::debug;

use crate::context::{HostAgents, DISCOVERY_AGENT_TYPE, OVS_AGENT_TYPE};
use crate::error::{BindingError, BindingResult};

#[derive(Clone)]
pub struct MappingResolver {
    store: StateStore,
    statics: StaticMappings,
    /// Seconds a discovered switch port stays usable.
    max_age: u64,
    agents: Arc<dyn HostAgents>,
}

impl MappingResolver {
    pub fn new(
        store: StateStore,
        statics: StaticMappings,
        max_age: u64,
        agents: Arc<dyn HostAgents>,
    ) -> Self {
        Self {
            store,
            statics,
            max_age,
            agents,
        }
    }

    pub fn from_config(
        config: &FabricConfig,
        store: StateStore,
        agents: Arc<dyn HostAgents>,
    ) -> BindingResult<Self> {
        Ok(Self::new(
            store,
            config.static_mappings()?,
            config.binding.dynamic_entry_age,
            agents,
        ))
    }

    /// Topology of `host`: fresh discovered ports while the discovery agent
    /// is alive, otherwise the static configuration.
    pub fn switch_ports_map(
        &self,
        host: &str,
        exclude_physnets: &[String],
    ) -> BindingResult<PhysnetPorts> {
        if self.agents.is_agent_alive(host, DISCOVERY_AGENT_TYPE) {
            let dynamic =
                self.store
                    .dynamic_mappings_for_host(host, self.max_age, exclude_physnets)?;
            if !dynamic.is_empty() {
                return Ok(dynamic);
            }
            debug!(%host, "no fresh discovered topology, trying static mappings");
        }

        let statics = self.statics.for_host(host, exclude_physnets);
        if statics.is_empty() {
            return Err(BindingError::NoValidMappings {
                host: host.to_string(),
            });
        }
        Ok(statics)
    }

    /// Physnets `host` is attached to, minus `exclude_physnets`.
    pub fn reachable_physnets(
        &self,
        host: &str,
        exclude_physnets: &[String],
    ) -> BindingResult<Vec<String>> {
        Ok(self
            .switch_ports_map(host, exclude_physnets)?
            .into_keys()
            .collect())
    }

    /// Add switch ports to a mapping about to be retired.
    pub fn resolve_delete(&self, mut mapping: FabricMapping) -> BindingResult<FabricMapping> {
        mapping.switch_ports = self.physnet_ports(&mapping)?;
        Ok(mapping)
    }

    /// Add switch ports, management IP and bridge name to a mapping about to
    /// be provisioned.
    pub fn resolve_create(&self, mut mapping: FabricMapping) -> BindingResult<FabricMapping> {
        mapping.switch_ports = self.physnet_ports(&mapping)?;
        mapping.management_ip = Some(self.management_ip(&mapping.host)?);
        mapping.bridge_name = Some(self.bridge_name(&mapping.host, &mapping.physnet)?);
        Ok(mapping)
    }

    fn physnet_ports(&self, mapping: &FabricMapping) -> BindingResult<BTreeSet<SwitchPort>> {
        self.switch_ports_map(&mapping.host, &[])?
            .remove(&mapping.physnet)
            .ok_or_else(|| BindingError::NoValidMappingsPhysnet {
                host: mapping.host.clone(),
                physnet: mapping.physnet.clone(),
            })
    }

    fn management_ip(&self, host: &str) -> BindingResult<String> {
        let discovered = self
            .agents
            .agents(host, DISCOVERY_AGENT_TYPE)
            .into_iter()
            .find_map(|agent| non_empty_str(agent.configurations.get("management_ip")));
        if let Some(ip) = discovered {
            return Ok(ip);
        }
        self.statics
            .host_ip(host)
            .map(str::to_string)
            .ok_or_else(|| BindingError::NoMgmtIP {
                host: host.to_string(),
            })
    }

    fn bridge_name(&self, host: &str, physnet: &str) -> BindingResult<String> {
        self.agents
            .agents(host, OVS_AGENT_TYPE)
            .into_iter()
            .find_map(|agent| {
                non_empty_str(
                    agent
                        .configurations
                        .get("bridge_mappings")
                        .and_then(|m| m.get(physnet)),
                )
            })
            .ok_or_else(|| BindingError::NoBridgeName {
                host: host.to_string(),
                physnet: physnet.to_string(),
            })
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{discovery_agent, ovs_agent, static_config, FakeAgents};

    fn report(entries: &[(&str, &str, &str)]) -> PhysnetPorts {
        let mut report = PhysnetPorts::new();
        for (physnet, switch, port) in entries {
            report
                .entry(physnet.to_string())
                .or_default()
                .insert((switch.to_string(), port.to_string()));
        }
        report
    }

    fn resolver(store: &StateStore, agents: FakeAgents) -> MappingResolver {
        MappingResolver::new(store.clone(), static_config(), 30, Arc::new(agents))
    }

    #[test]
    fn dynamic_topology_preferred_when_agent_alive() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .update_dynamic_mappings("compute-1", &report(&[("physnet1", "sw9", "9/9")]))
            .unwrap();
        let agents = FakeAgents::default().with("compute-1", discovery_agent(None, true));

        let ports = resolver(&store, agents).switch_ports_map("compute-1", &[]).unwrap();
        assert_eq!(
            ports["physnet1"],
            BTreeSet::from([("sw9".to_string(), "9/9".to_string())])
        );
    }

    #[test]
    fn dead_agent_falls_back_to_static() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .update_dynamic_mappings("compute-1", &report(&[("physnet1", "sw9", "9/9")]))
            .unwrap();
        let agents = FakeAgents::default().with("compute-1", discovery_agent(None, false));

        let ports = resolver(&store, agents).switch_ports_map("compute-1", &[]).unwrap();
        assert!(ports["physnet1"].contains(&("sw1".to_string(), "1/1".to_string())));
    }

    #[test]
    fn unknown_host_has_no_mappings() {
        let store = StateStore::open_in_memory().unwrap();
        let err = resolver(&store, FakeAgents::default())
            .switch_ports_map("compute-9", &[])
            .unwrap_err();
        assert!(matches!(err, BindingError::NoValidMappings { .. }));
    }

    #[test]
    fn excluded_physnets_not_reachable() {
        let store = StateStore::open_in_memory().unwrap();
        let r = resolver(&store, FakeAgents::default());
        assert_eq!(
            r.reachable_physnets("compute-1", &[]).unwrap(),
            vec!["physnet1".to_string(), "physnet2".to_string()]
        );
        assert_eq!(
            r.reachable_physnets("compute-1", &["physnet1".to_string()]).unwrap(),
            vec!["physnet2".to_string()]
        );
    }

    #[test]
    fn create_resolution_fills_everything() {
        let store = StateStore::open_in_memory().unwrap();
        let agents = FakeAgents::default()
            .with("compute-1", discovery_agent(Some("192.168.0.11"), true))
            .with("compute-1", ovs_agent(&[("physnet1", "br-eth1")]));
        let mapping = resolver(&store, agents)
            .resolve_create(FabricMapping::new("compute-1", "physnet1", 100, Some(20001)))
            .unwrap();
        assert_eq!(mapping.management_ip.as_deref(), Some("192.168.0.11"));
        assert_eq!(mapping.bridge_name.as_deref(), Some("br-eth1"));
        assert_eq!(mapping.switch_ports.len(), 2);
    }

    #[test]
    fn management_ip_falls_back_to_static_host_ip() {
        let store = StateStore::open_in_memory().unwrap();
        let agents = FakeAgents::default().with("compute-1", ovs_agent(&[("physnet1", "br-eth1")]));
        let mapping = resolver(&store, agents)
            .resolve_create(FabricMapping::new("compute-1", "physnet1", 100, None))
            .unwrap();
        assert_eq!(mapping.management_ip.as_deref(), Some("10.0.0.11"));
    }

    #[test]
    fn discovered_host_without_address_has_no_management_ip() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .update_dynamic_mappings("compute-3", &report(&[("physnet1", "sw3", "3/1")]))
            .unwrap();
        let agents = FakeAgents::default()
            .with("compute-3", discovery_agent(None, true))
            .with("compute-3", ovs_agent(&[("physnet1", "br-eth1")]));
        let err = resolver(&store, agents)
            .resolve_create(FabricMapping::new("compute-3", "physnet1", 100, None))
            .unwrap_err();
        assert!(matches!(err, BindingError::NoMgmtIP { .. }));
    }

    #[test]
    fn missing_pieces_reported() {
        let store = StateStore::open_in_memory().unwrap();
        let r = resolver(&store, FakeAgents::default());

        let err = r
            .resolve_create(FabricMapping::new("compute-1", "physnet1", 100, None))
            .unwrap_err();
        assert!(matches!(err, BindingError::NoBridgeName { .. }));

        let err = r
            .resolve_delete(FabricMapping::new("compute-1", "physnet7", 100, None))
            .unwrap_err();
        assert!(matches!(err, BindingError::NoValidMappingsPhysnet { .. }));

        // Deletes only need the switch ports.
        let mapping = r
            .resolve_delete(FabricMapping::new("compute-1", "physnet2", 100, None))
            .unwrap();
        assert_eq!(mapping.switch_ports.len(), 1);
        assert!(mapping.bridge_name.is_none());
    }
}
