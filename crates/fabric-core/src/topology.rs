//! Host attachment topology: which switch ports back each physnet of a host.
//!
//! The same shape is produced by discovery agents (dynamic topology) and by
//! the `[static_mappings]` configuration section (static fallback).

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, ConfigResult};

/// A `(switch, port)` pair on the fabric.
pub type SwitchPort = (String, String);

/// Physnet name → switch ports backing it (several when bonded).
pub type PhysnetPorts = BTreeMap<String, BTreeSet<SwitchPort>>;

/// Static attachment of one host, as written in configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StaticHostConfig {
    /// Management address the SDN uses to configure the host's OVS.
    pub host_ip: Option<String>,
    /// Physnet → list of `"switch:port"` entries.
    #[serde(default)]
    pub physnets: BTreeMap<String, Vec<String>>,
}

/// Validated static topology and management addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticMappings {
    mappings: HashMap<String, PhysnetPorts>,
    host_ips: HashMap<String, String>,
}

impl StaticMappings {
    /// Validate the `[static_mappings]` section.
    ///
    /// Rejects hosts without `host_ip`, malformed or empty `switch:port`
    /// entries, duplicates within a physnet, and a switch port claimed by
    /// two attachments.
    pub fn from_config(hosts: &BTreeMap<String, StaticHostConfig>) -> ConfigResult<Self> {
        let mut mappings: HashMap<String, PhysnetPorts> = HashMap::new();
        let mut host_ips = HashMap::new();
        let mut owners: HashMap<SwitchPort, String> = HashMap::new();

        for (host, config) in hosts {
            let invalid = |reason: String| ConfigError::InvalidStaticMapping {
                host: host.clone(),
                reason,
            };

            let host_ip = config
                .host_ip
                .as_deref()
                .filter(|ip| !ip.is_empty())
                .ok_or_else(|| invalid("no host_ip".to_string()))?;
            host_ips.insert(host.clone(), host_ip.to_string());

            let host_ports = mappings.entry(host.clone()).or_default();
            for (physnet, entries) in &config.physnets {
                let physnet_ports = host_ports.entry(physnet.clone()).or_default();
                for entry in entries {
                    let (switch, port) = entry
                        .trim()
                        .split_once(':')
                        .filter(|(_, port)| !port.contains(':'))
                        .ok_or_else(|| invalid(format!("wrong format of static mapping: {entry}")))?;
                    if switch.is_empty() || port.is_empty() {
                        return Err(invalid(format!("switch or port is empty in '{entry}'")));
                    }
                    let key = (switch.to_string(), port.to_string());
                    if physnet_ports.contains(&key) {
                        return Err(invalid(format!(
                            "duplicate port {switch}:{port} in physnet {physnet}"
                        )));
                    }
                    if let Some(owner) = owners.get(&key) {
                        return Err(invalid(format!(
                            "attached to the same port {port} on switch {switch} as host {owner}"
                        )));
                    }
                    owners.insert(key.clone(), host.clone());
                    physnet_ports.insert(key);
                }
            }
        }

        if !hosts.is_empty() && owners.is_empty() {
            warn!("static mappings configured without any switch ports");
        }

        Ok(Self { mappings, host_ips })
    }

    /// Static topology of a host, minus excluded physnets.
    pub fn for_host(&self, host: &str, exclude_physnets: &[String]) -> PhysnetPorts {
        self.mappings
            .get(host)
            .map(|physnets| {
                physnets
                    .iter()
                    .filter(|(physnet, ports)| {
                        !ports.is_empty() && !exclude_physnets.contains(physnet)
                    })
                    .map(|(physnet, ports)| (physnet.clone(), ports.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn host_ip(&self, host: &str) -> Option<&str> {
        self.host_ips.get(host).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}
