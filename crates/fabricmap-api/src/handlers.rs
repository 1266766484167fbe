//! REST API handlers.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use fabric_core::{PhysnetPorts, SegmentAttrs, SwitchPort};
use fabricmap_binding::{BindingError, PortContext};
use fabricmap_state::StateError;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::registry::AgentReport;
use crate::{ApiState, PortDriver};

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn internal_error(e: impl std::fmt::Display) -> axum::response::Response {
    error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response()
}

fn binding_error(e: BindingError) -> axum::response::Response {
    let status = match &e {
        BindingError::NoValidMappings { .. }
        | BindingError::NoValidMappingsPhysnet { .. }
        | BindingError::NoBridgeName { .. }
        | BindingError::NoMgmtIP { .. }
        | BindingError::NoDynamicSegment { .. }
        | BindingError::InvalidSegment(_) => StatusCode::UNPROCESSABLE_ENTITY,
        BindingError::Sdn(_) => StatusCode::BAD_GATEWAY,
        BindingError::State(StateError::MappingConflict { .. }) => StatusCode::CONFLICT,
        BindingError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!(error = %e, %status, "port event failed");
    error_response(&e.to_string(), status).into_response()
}

fn driver(state: &ApiState) -> Result<&PortDriver, axum::response::Response> {
    state.driver.as_deref().ok_or_else(|| {
        error_response("no SDN controller configured", StatusCode::SERVICE_UNAVAILABLE)
            .into_response()
    })
}

// ── Topology ───────────────────────────────────────────────────

/// Topology report body: physnet → `[switch, port]` pairs.
pub type TopologyReport = BTreeMap<String, Vec<SwitchPort>>;

#[derive(Debug, Serialize, Deserialize)]
pub struct TopologyUpdate {
    pub host: String,
    pub ports: u32,
}

/// PUT /api/v1/topology/{host}
pub async fn report_topology(
    State(state): State<ApiState>,
    Path(host): Path<String>,
    Json(report): Json<TopologyReport>,
) -> impl IntoResponse {
    if let Some((physnet, _)) = report
        .iter()
        .flat_map(|(physnet, ports)| ports.iter().map(move |p| (physnet, p)))
        .find(|(_, (switch, port))| switch.is_empty() || port.is_empty())
    {
        return error_response(
            &format!("empty switch or port in physnet {physnet}"),
            StatusCode::BAD_REQUEST,
        )
        .into_response();
    }

    let ports: PhysnetPorts = report
        .into_iter()
        .map(|(physnet, ports)| (physnet, ports.into_iter().collect()))
        .collect();
    match state.store.update_dynamic_mappings(&host, &ports) {
        Ok(updated) => ApiResponse::ok(TopologyUpdate {
            host,
            ports: updated,
        })
        .into_response(),
        Err(e) => internal_error(e),
    }
}

/// GET /api/v1/topology/{host}
pub async fn get_topology(
    State(state): State<ApiState>,
    Path(host): Path<String>,
) -> impl IntoResponse {
    match state.store.list_dynamic_mappings(&host) {
        Ok(rows) => ApiResponse::ok(rows).into_response(),
        Err(e) => internal_error(e),
    }
}

/// DELETE /api/v1/topology/{host}
pub async fn drop_topology(
    State(state): State<ApiState>,
    Path(host): Path<String>,
) -> impl IntoResponse {
    match state.store.drop_dynamic_mappings(&host) {
        Ok(removed) => ApiResponse::ok(TopologyUpdate {
            host,
            ports: removed,
        })
        .into_response(),
        Err(e) => internal_error(e),
    }
}

// ── Agents ─────────────────────────────────────────────────────

/// PUT /api/v1/agents/{host}
pub async fn report_agent(
    State(state): State<ApiState>,
    Path(host): Path<String>,
    Json(report): Json<AgentReport>,
) -> impl IntoResponse {
    if report.agent_type.is_empty() {
        return error_response("agent_type must not be empty", StatusCode::BAD_REQUEST)
            .into_response();
    }
    state.agents.report(&host, report);
    ApiResponse::ok(state.agents.host_agents(&host)).into_response()
}

/// GET /api/v1/agents/{host}
pub async fn list_agents(
    State(state): State<ApiState>,
    Path(host): Path<String>,
) -> impl IntoResponse {
    ApiResponse::ok(state.agents.host_agents(&host))
}

// ── Port events ────────────────────────────────────────────────

/// POST /api/v1/ports/update
///
/// Runs the precommit hook and records the port's binding under the
/// network's ports lock, then the postcommit hook.
pub async fn update_port(
    State(state): State<ApiState>,
    Json(ctx): Json<PortContext>,
) -> axum::response::Response {
    let driver = match driver(&state) {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    let precommit = state.store.with_ports_lock(&ctx.network_id, || {
        driver.update_port_precommit(&ctx)?;
        match ctx.host() {
            Some(host) if !ctx.binding_levels.is_empty() => {
                state.store.record_port_binding(host, &ctx.network_id, &ctx.port_id)?;
            }
            _ => {
                state.store.clear_port_binding(&ctx.network_id, &ctx.port_id)?;
            }
        }
        Ok::<_, BindingError>(())
    });
    if let Err(e) = precommit {
        return binding_error(e);
    }
    match driver.update_port_postcommit(&ctx).await {
        Ok(outcome) => ApiResponse::ok(outcome).into_response(),
        Err(e) => binding_error(e),
    }
}

/// POST /api/v1/ports/delete
pub async fn delete_port(
    State(state): State<ApiState>,
    Json(ctx): Json<PortContext>,
) -> axum::response::Response {
    let driver = match driver(&state) {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    let precommit = state.store.with_ports_lock(&ctx.network_id, || {
        driver.delete_port_precommit(&ctx)?;
        state.store.clear_port_binding(&ctx.network_id, &ctx.port_id)?;
        Ok::<_, BindingError>(())
    });
    if let Err(e) = precommit {
        return binding_error(e);
    }
    match driver.delete_port_postcommit(&ctx).await {
        Ok(outcome) => ApiResponse::ok(outcome).into_response(),
        Err(e) => binding_error(e),
    }
}

/// Dynamic segment the framework should bind next.
#[derive(Debug, Serialize, Deserialize)]
pub struct BindResponse {
    pub segment_id: Option<String>,
    pub dynamic_segment: SegmentAttrs,
}

/// POST /api/v1/ports/bind
///
/// `data` is null when the driver does not bind the port.
pub async fn bind_port(
    State(state): State<ApiState>,
    Json(ctx): Json<PortContext>,
) -> axum::response::Response {
    let driver = match driver(&state) {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    match driver.bind_port(&ctx) {
        Ok(decision) => ApiResponse::ok(decision.map(|d| BindResponse {
            dynamic_segment: d.segment_attrs(),
            segment_id: d.segment_id,
        }))
        .into_response(),
        Err(e) => binding_error(e),
    }
}

/// DELETE /api/v1/networks/{network_id}/segments
pub async fn release_segments(
    State(state): State<ApiState>,
    Path(network_id): Path<String>,
) -> axum::response::Response {
    let driver = match driver(&state) {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    match driver.release_network_segments(&network_id) {
        Ok(released) => ApiResponse::ok(released).into_response(),
        Err(e) => binding_error(e),
    }
}

// ── Transactions ───────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct TransactionsDone {
    pub tx_ids: Vec<String>,
}

/// POST /api/v1/transactions/done
pub async fn transactions_done(
    State(state): State<ApiState>,
    Json(req): Json<TransactionsDone>,
) -> impl IntoResponse {
    debug!(tx_ids = ?req.tx_ids, "transactions reported done");
    match state.store.transactions_done(&req.tx_ids) {
        Ok(summary) => ApiResponse::ok(summary).into_response(),
        Err(e) => internal_error(e),
    }
}

// ── Inspection ─────────────────────────────────────────────────

/// GET /api/v1/mappings
pub async fn list_mappings(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_mappings() {
        Ok(mappings) => ApiResponse::ok(mappings).into_response(),
        Err(e) => internal_error(e),
    }
}

/// GET /api/v1/pools/isid
pub async fn isid_pool(State(state): State<ApiState>) -> impl IntoResponse {
    match state.isid_pool.pool_stats() {
        Ok(stats) => ApiResponse::ok(stats).into_response(),
        Err(e) => internal_error(e),
    }
}
