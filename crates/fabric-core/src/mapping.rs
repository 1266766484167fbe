//! The fabric-side view of a host/network attachment.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::topology::SwitchPort;

/// Everything the SDN backend needs to provision or retire one
/// host/network attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FabricMapping {
    pub host: String,
    pub physnet: String,
    pub vlan: u32,
    /// Present when the network is an ISID network carried over `vlan`.
    pub isid: Option<u32>,
    pub switch_ports: BTreeSet<SwitchPort>,
    /// Only needed for creates.
    pub management_ip: Option<String>,
    pub bridge_name: Option<String>,
}

impl FabricMapping {
    pub fn new(host: &str, physnet: &str, vlan: u32, isid: Option<u32>) -> Self {
        Self {
            host: host.to_string(),
            physnet: physnet.to_string(),
            vlan,
            isid,
            switch_ports: BTreeSet::new(),
            management_ip: None,
            bridge_name: None,
        }
    }
}
