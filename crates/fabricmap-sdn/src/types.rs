//! Request and response bodies of the SDN REST API.

use fabric_core::FabricMapping;
use serde::{Deserialize, Serialize};

/// VLAN/ISID pair bound on a switch port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    pub vlan: u32,
    pub isid: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchPortBinding {
    pub switch_ip: String,
    pub port: String,
    pub bindings: Vec<PortBinding>,
}

/// Body of network create and delete requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRequest {
    pub switch_port_bindings: Vec<SwitchPortBinding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compute_host_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ovs_bridge: Option<String>,
}

impl From<&FabricMapping> for NetworkRequest {
    fn from(mapping: &FabricMapping) -> Self {
        let switch_port_bindings = mapping
            .switch_ports
            .iter()
            .map(|(switch, port)| SwitchPortBinding {
                switch_ip: switch.clone(),
                port: port.clone(),
                bindings: vec![PortBinding {
                    vlan: mapping.vlan,
                    isid: mapping.isid,
                }],
            })
            .collect();
        Self {
            switch_port_bindings,
            compute_host_ip: mapping.management_ip.clone(),
            ovs_bridge: mapping.bridge_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionStatus {
    pub transaction_id: String,
    pub status: String,
}

impl TransactionStatus {
    pub const COMPLETED: &'static str = "Completed";

    pub fn is_completed(&self) -> bool {
        self.status == Self::COMPLETED
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RegisterResponse {
    pub openstack_id: String,
}
