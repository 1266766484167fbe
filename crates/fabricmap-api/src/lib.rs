//! fabricmap-api: REST API used by host discovery agents, the orchestration
//! framework and operators.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | PUT | `/api/v1/topology/{host}` | Report the switch ports behind a host |
//! | GET | `/api/v1/topology/{host}` | Discovered switch ports of a host |
//! | DELETE | `/api/v1/topology/{host}` | Forget a host's discovered topology |
//! | PUT | `/api/v1/agents/{host}` | Report an agent running on a host |
//! | GET | `/api/v1/agents/{host}` | Agents reported by a host |
//! | POST | `/api/v1/ports/update` | Port update event (precommit + postcommit) |
//! | POST | `/api/v1/ports/delete` | Port delete event (precommit + postcommit) |
//! | POST | `/api/v1/ports/bind` | Bind an ISID segment to a dynamic VLAN segment |
//! | DELETE | `/api/v1/networks/{network_id}/segments` | Release a deleted network's VLANs |
//! | POST | `/api/v1/transactions/done` | Reconcile completed SDN transactions |
//! | GET | `/api/v1/mappings` | List host/network mappings |
//! | GET | `/api/v1/pools/isid` | ISID pool usage |
//!
//! The port and network routes answer 503 when no SDN controller is
//! configured.

pub mod handlers;
pub mod registry;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use fabric_core::IdRange;
use fabricmap_binding::{FabricMechanismDriver, MappingAgent};
use fabricmap_state::{IdAllocator, StateStore};

pub use registry::{AgentRegistry, AgentReport, RegisteredAgent};

/// Mechanism driver driven by the port routes.
pub type PortDriver = FabricMechanismDriver<Arc<dyn MappingAgent>>;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub isid_pool: IdAllocator,
    pub agents: Arc<AgentRegistry>,
    pub driver: Option<Arc<PortDriver>>,
}

impl ApiState {
    pub fn new(store: StateStore, isid_ranges: Vec<IdRange>, agents: Arc<AgentRegistry>) -> Self {
        Self {
            isid_pool: IdAllocator::isid(store.clone(), isid_ranges),
            store,
            agents,
            driver: None,
        }
    }

    pub fn with_driver(mut self, driver: Arc<PortDriver>) -> Self {
        self.driver = Some(driver);
        self
    }
}

/// Build the API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route(
            "/topology/{host}",
            get(handlers::get_topology)
                .put(handlers::report_topology)
                .delete(handlers::drop_topology),
        )
        .route(
            "/agents/{host}",
            get(handlers::list_agents).put(handlers::report_agent),
        )
        .route("/ports/update", post(handlers::update_port))
        .route("/ports/delete", post(handlers::delete_port))
        .route("/ports/bind", post(handlers::bind_port))
        .route(
            "/networks/{network_id}/segments",
            delete(handlers::release_segments),
        )
        .route("/transactions/done", post(handlers::transactions_done))
        .route("/mappings", get(handlers::list_mappings))
        .route("/pools/isid", get(handlers::isid_pool))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
