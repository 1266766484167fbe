//! Fakes for the framework collaborators and the SDN controller.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use fabric_core::{FabricMapping, SegmentAttrs, StaticHostConfig, StaticMappings};
use fabricmap_sdn::{SdnClient, SdnError};
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::agent::{AgentFuture, MappingAgent};
use crate::context::{AgentInfo, HostAgents, PortInventory, DISCOVERY_AGENT_TYPE, OVS_AGENT_TYPE};
use crate::error::BindingResult;

pub fn isid_segment(id: u32) -> SegmentAttrs {
    json!({ "id": "seg-isid", "network_type": "isid", "segmentation_id": id })
        .as_object()
        .cloned()
        .unwrap()
}

pub fn vlan_segment(physnet: &str, id: u32) -> SegmentAttrs {
    json!({
        "id": "seg-vlan",
        "network_type": "vlan",
        "physical_network": physnet,
        "segmentation_id": id,
    })
    .as_object()
    .cloned()
    .unwrap()
}

/// compute-1: physnet1 bonded over sw1/sw2, physnet2 on sw1.
/// compute-2: physnet1 on sw1.
pub fn static_config() -> StaticMappings {
    let host = |ip: &str, physnets: &[(&str, &[&str])]| StaticHostConfig {
        host_ip: Some(ip.to_string()),
        physnets: physnets
            .iter()
            .map(|(p, e)| (p.to_string(), e.iter().map(|s| s.to_string()).collect()))
            .collect(),
    };
    let mut hosts = BTreeMap::new();
    hosts.insert(
        "compute-1".to_string(),
        host(
            "10.0.0.11",
            &[("physnet1", &["sw1:1/1", "sw2:1/1"]), ("physnet2", &["sw1:2/1"])],
        ),
    );
    hosts.insert(
        "compute-2".to_string(),
        host("10.0.0.12", &[("physnet1", &["sw1:1/2"])]),
    );
    StaticMappings::from_config(&hosts).unwrap()
}

#[derive(Default)]
pub struct FakeAgents {
    agents: HashMap<String, Vec<(String, AgentInfo)>>,
}

impl FakeAgents {
    pub fn with(mut self, host: &str, agent: (String, AgentInfo)) -> Self {
        self.agents.entry(host.to_string()).or_default().push(agent);
        self
    }
}

impl HostAgents for FakeAgents {
    fn agents(&self, host: &str, agent_type: &str) -> Vec<AgentInfo> {
        self.agents
            .get(host)
            .into_iter()
            .flatten()
            .filter(|(t, _)| t == agent_type)
            .map(|(_, info)| info.clone())
            .collect()
    }
}

pub fn discovery_agent(management_ip: Option<&str>, alive: bool) -> (String, AgentInfo) {
    let configurations = match management_ip {
        Some(ip) => json!({ "management_ip": ip }),
        None => json!({}),
    };
    (
        DISCOVERY_AGENT_TYPE.to_string(),
        AgentInfo {
            configurations,
            alive,
            admin_state_up: true,
        },
    )
}

pub fn ovs_agent(bridges: &[(&str, &str)]) -> (String, AgentInfo) {
    let mappings: serde_json::Map<String, Value> = bridges
        .iter()
        .map(|(physnet, bridge)| (physnet.to_string(), json!(bridge)))
        .collect();
    (
        OVS_AGENT_TYPE.to_string(),
        AgentInfo {
            configurations: json!({ "bridge_mappings": mappings }),
            alive: true,
            admin_state_up: true,
        },
    )
}

/// Bound ports as `(host, network, port)`.
#[derive(Default)]
pub struct FakePorts {
    ports: Mutex<HashSet<(String, String, String)>>,
}

impl FakePorts {
    pub fn add(&self, host: &str, network_id: &str, port_id: &str) {
        self.ports
            .lock()
            .insert((host.into(), network_id.into(), port_id.into()));
    }
}

impl PortInventory for FakePorts {
    fn other_ports_exist(&self, host: &str, network_id: &str, excluding_port: &str) -> bool {
        self.ports
            .lock()
            .iter()
            .any(|(h, n, p)| h == host && n == network_id && p != excluding_port)
    }
}

/// Records every submission and hands out `tx-1`, `tx-2`, ...
#[derive(Default)]
pub struct RecordingAgent {
    pub created: Mutex<Vec<FabricMapping>>,
    pub deleted: Mutex<Vec<FabricMapping>>,
    pub fail: AtomicBool,
    next: AtomicU32,
}

impl RecordingAgent {
    fn submit(
        &self,
        log: &Mutex<Vec<FabricMapping>>,
        mapping: &FabricMapping,
    ) -> BindingResult<String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SdnError::Timeout(Duration::from_secs(10)).into());
        }
        log.lock().push(mapping.clone());
        Ok(format!("tx-{}", self.next.fetch_add(1, Ordering::SeqCst) + 1))
    }
}

impl MappingAgent for RecordingAgent {
    fn create_mapping<'a>(&'a self, mapping: &'a FabricMapping) -> AgentFuture<'a> {
        Box::pin(async move { self.submit(&self.created, mapping) })
    }

    fn delete_mapping<'a>(&'a self, mapping: &'a FabricMapping) -> AgentFuture<'a> {
        Box::pin(async move { self.submit(&self.deleted, mapping) })
    }
}

/// Fake SDN controller that registers as `openstack_id` and reports every
/// transaction as completed. Without `with_location` accepted requests carry
/// no `Location` header.
pub fn fake_sdn(openstack_id: &'static str, with_location: bool) -> Router {
    let accepted = move |tx: &'static str| -> Response {
        if with_location {
            let location = format!("/network/v1.0/transaction/{openstack_id}/{tx}");
            (StatusCode::ACCEPTED, [("location", location)]).into_response()
        } else {
            StatusCode::ACCEPTED.into_response()
        }
    };
    let on_create = accepted.clone();
    let on_delete = accepted;

    Router::new()
        .route(
            "/network/v1.0/register",
            post(move || async move { Json(json!({ "openstack_id": openstack_id })) }),
        )
        .route(
            "/network/v1.0/{id}",
            post(move || async move { on_create("tx-create") })
                .delete(move || async move { on_delete("tx-delete") }),
        )
        .route(
            "/network/v1.0/transaction/{id}/{txs}",
            get(|Path((_id, txs)): Path<(String, String)>| async move {
                let statuses: Vec<Value> = txs
                    .split(',')
                    .map(|tx| json!({ "transaction_id": tx, "status": "Completed" }))
                    .collect();
                Json(Value::Array(statuses))
            }),
        )
}

pub async fn sdn_client(app: Router) -> SdnClient {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    SdnClient::new(&format!("http://{addr}"), "admin", "secret", Duration::from_secs(5)).unwrap()
}
