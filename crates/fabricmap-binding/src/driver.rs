//! Mechanism driver: the port lifecycle hooks called by the orchestration
//! framework.
//!
//! Precommit hooks only touch the state store and run inside the framework's
//! own transaction. Postcommit hooks claim a mapping, talk to the SDN backend
//! through a [`MappingAgent`] and commit the outcome.

use std::sync::Arc;

use fabric_core::{DynamicSegmentSpec, FabricConfig, FabricMapping, Segment, SegmentAttrs};
use fabricmap_state::{
    DynamicSegment, DynamicSegments, MappingOutcome, MappingStatus, StateStore,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::agent::MappingAgent;
use crate::context::{segment_id, HostAgents, PortContext, PortInventory};
use crate::error::{BindingError, BindingResult};
use crate::policy::{classify, is_supported_network, mapping_target, EventKind};
use crate::resolver::MappingResolver;

/// What a postcommit hook did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessOutcome {
    /// Nothing to do for this event, or another worker owns the mapping.
    Skipped,
    /// The SDN call was made and its transaction recorded.
    Submitted { tx_id: String },
    /// The SDN call was made but the mapping changed meanwhile; the
    /// transaction was not recorded.
    Superseded { tx_id: String },
}

/// Result of binding an ISID segment: continue with a dynamic VLAN segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingDecision {
    /// Framework id of the ISID segment that was bound.
    pub segment_id: Option<String>,
    pub dynamic_segment: DynamicSegmentSpec,
}

impl BindingDecision {
    /// The dynamic segment in the framework's attribute form.
    pub fn segment_attrs(&self) -> SegmentAttrs {
        self.dynamic_segment.to_attrs()
    }
}

pub struct FabricMechanismDriver<A> {
    store: StateStore,
    resolver: MappingResolver,
    segments: DynamicSegments,
    ports: Arc<dyn PortInventory>,
    agent: A,
    /// Physnets with statically assigned VLAN ranges; never used for
    /// dynamic segments.
    static_vlan_physnets: Vec<String>,
}

impl<A: MappingAgent> FabricMechanismDriver<A> {
    pub fn new(
        store: StateStore,
        resolver: MappingResolver,
        segments: DynamicSegments,
        ports: Arc<dyn PortInventory>,
        agent: A,
        static_vlan_physnets: Vec<String>,
    ) -> Self {
        Self {
            store,
            resolver,
            segments,
            ports,
            agent,
            static_vlan_physnets,
        }
    }

    pub fn from_config(
        config: &FabricConfig,
        store: StateStore,
        agents: Arc<dyn HostAgents>,
        ports: Arc<dyn PortInventory>,
        agent: A,
    ) -> BindingResult<Self> {
        let resolver = MappingResolver::from_config(config, store.clone(), agents)?;
        let segments = DynamicSegments::new(
            store.clone(),
            config.vlan_range()?,
            config.vlan.physnet_mtus.clone(),
            config.vlan.default_mtu,
        );
        Ok(Self::new(
            store,
            resolver,
            segments,
            ports,
            agent,
            config.vlan.static_physnets.clone(),
        ))
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn update_port_precommit(&self, ctx: &PortContext) -> BindingResult<()> {
        if !is_supported_network(ctx) {
            return Ok(());
        }
        match classify(ctx) {
            EventKind::Migrating => {
                if let Some(old_host) = ctx.original_host() {
                    self.request_delete(old_host, ctx)?;
                }
            }
            EventKind::Binding | EventKind::HostAssigned => {
                if let Some(host) = ctx.host() {
                    self.store.try_create_mapping(host, &ctx.network_id)?;
                }
            }
            EventKind::Ignored => {}
        }
        Ok(())
    }

    pub async fn update_port_postcommit(&self, ctx: &PortContext) -> BindingResult<ProcessOutcome> {
        if !is_supported_network(ctx) {
            return Ok(ProcessOutcome::Skipped);
        }
        match classify(ctx) {
            EventKind::Migrating => {
                let Some(old_host) = ctx.original_host() else {
                    return Ok(ProcessOutcome::Skipped);
                };
                let target = mapping_target(
                    old_host,
                    ctx.original_top_bound_segment(),
                    ctx.original_bottom_bound_segment(),
                )?;
                self.retire(old_host, &ctx.network_id, target).await
            }
            EventKind::Binding => {
                let Some(host) = ctx.host() else {
                    return Ok(ProcessOutcome::Skipped);
                };
                let target =
                    mapping_target(host, ctx.top_bound_segment(), ctx.bottom_bound_segment())?;
                self.provision(host, &ctx.network_id, target).await
            }
            EventKind::HostAssigned | EventKind::Ignored => Ok(ProcessOutcome::Skipped),
        }
    }

    pub fn delete_port_precommit(&self, ctx: &PortContext) -> BindingResult<()> {
        if !is_supported_network(ctx) {
            return Ok(());
        }
        if let Some(host) = ctx.host() {
            self.request_delete(host, ctx)?;
        }
        Ok(())
    }

    pub async fn delete_port_postcommit(&self, ctx: &PortContext) -> BindingResult<ProcessOutcome> {
        if !is_supported_network(ctx) {
            return Ok(ProcessOutcome::Skipped);
        }
        let Some(host) = ctx.host() else {
            return Ok(ProcessOutcome::Skipped);
        };
        let target = mapping_target(host, ctx.top_bound_segment(), ctx.bottom_bound_segment())?;
        self.retire(host, &ctx.network_id, target).await
    }

    /// Bind the first ISID segment that can get a dynamic VLAN on one of the
    /// host's physnets.
    ///
    /// Returns `None` when there is no ISID segment to bind.
    pub fn bind_port(&self, ctx: &PortContext) -> BindingResult<Option<BindingDecision>> {
        let Some(host) = ctx.host() else {
            return Ok(None);
        };

        let mut saw_isid = false;
        for attrs in &ctx.segments_to_bind {
            match Segment::from_attrs(attrs) {
                Ok(Segment::Isid { .. }) => saw_isid = true,
                Ok(_) => continue,
                Err(e) => {
                    warn!(port = %ctx.port_id, error = %e, "skipping malformed segment");
                    continue;
                }
            }

            let physnets = match self
                .resolver
                .reachable_physnets(host, &self.static_vlan_physnets)
            {
                Ok(physnets) => physnets,
                Err(e) => {
                    warn!(%host, port = %ctx.port_id, error = %e, "no physnet to bind on");
                    continue;
                }
            };

            match self.segments.allocate(&ctx.network_id, &physnets)? {
                Some(segment) => {
                    info!(
                        %host,
                        port = %ctx.port_id,
                        network = %ctx.network_id,
                        physnet = %segment.physnet,
                        vlan = segment.vlan,
                        "port bound to dynamic segment"
                    );
                    return Ok(Some(BindingDecision {
                        segment_id: segment_id(attrs),
                        dynamic_segment: DynamicSegmentSpec::vlan(
                            &segment.physnet,
                            segment.vlan,
                            segment.mtu,
                        ),
                    }));
                }
                None => {
                    warn!(%host, network = %ctx.network_id, ?physnets, "no free vlan on any physnet");
                }
            }
        }

        if saw_isid {
            return Err(BindingError::NoDynamicSegment {
                port_id: ctx.port_id.clone(),
                network_id: ctx.network_id.clone(),
            });
        }
        Ok(None)
    }

    /// Return the dynamic segments of a deleted network to their pools.
    pub fn release_network_segments(&self, network_id: &str) -> BindingResult<Vec<DynamicSegment>> {
        Ok(self.segments.release_network(network_id)?)
    }

    fn request_delete(&self, host: &str, ctx: &PortContext) -> BindingResult<bool> {
        let ports = &self.ports;
        Ok(self.store.try_delete_mapping(host, &ctx.network_id, &ctx.port_id, || {
            ports.other_ports_exist(host, &ctx.network_id, &ctx.port_id)
        })?)
    }

    async fn provision(
        &self,
        host: &str,
        network_id: &str,
        target: Option<FabricMapping>,
    ) -> BindingResult<ProcessOutcome> {
        let Some(claim) = self
            .store
            .begin_processing(host, network_id, MappingStatus::New)?
        else {
            return Ok(ProcessOutcome::Skipped);
        };
        let Some(target) = target else {
            debug!(%host, network = %network_id, "bound segments carry no fabric mapping");
            return Ok(ProcessOutcome::Skipped);
        };

        let mapping = self.resolver.resolve_create(target)?;
        let tx_id = self.agent.create_mapping(&mapping).await.map_err(|e| {
            warn!(%host, network = %network_id, error = %e, "create submission failed");
            e
        })?;
        Ok(submitted(claim.commit(MappingOutcome::creating(&tx_id))?, tx_id))
    }

    async fn retire(
        &self,
        host: &str,
        network_id: &str,
        target: Option<FabricMapping>,
    ) -> BindingResult<ProcessOutcome> {
        let Some(claim) = self
            .store
            .begin_processing(host, network_id, MappingStatus::Delete)?
        else {
            return Ok(ProcessOutcome::Skipped);
        };
        let Some(target) = target else {
            debug!(%host, network = %network_id, "bound segments carry no fabric mapping");
            return Ok(ProcessOutcome::Skipped);
        };

        let mapping = self.resolver.resolve_delete(target)?;
        let tx_id = self.agent.delete_mapping(&mapping).await.map_err(|e| {
            warn!(%host, network = %network_id, error = %e, "delete submission failed");
            e
        })?;
        Ok(submitted(claim.commit(MappingOutcome::deleting(&tx_id))?, tx_id))
    }
}

fn submitted(committed: bool, tx_id: String) -> ProcessOutcome {
    if committed {
        ProcessOutcome::Submitted { tx_id }
    } else {
        warn!(%tx_id, "mapping changed while the SDN call was in flight");
        ProcessOutcome::Superseded { tx_id }
    }
}
