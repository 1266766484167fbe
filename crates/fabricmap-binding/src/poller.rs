//! Background polling of SDN transaction status.

use std::sync::Arc;
use std::time::Duration;

use fabricmap_state::{ReconcileSummary, StateStore};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::agent::SdnMappingAgent;
use crate::error::BindingResult;

pub struct TransactionPoller {
    agent: Arc<SdnMappingAgent>,
    store: StateStore,
}

impl TransactionPoller {
    pub fn new(agent: Arc<SdnMappingAgent>, store: StateStore) -> Self {
        Self { agent, store }
    }

    /// Ask the controller about every transaction recorded on a CREATING or
    /// DELETING mapping and reconcile the completed ones.
    ///
    /// A transaction becomes visible here once its mapping claim commits,
    /// whichever agent submitted it.
    pub async fn poll_once(&self) -> BindingResult<ReconcileSummary> {
        let pending = self.store.in_flight_transactions()?;
        if pending.is_empty() {
            return Ok(ReconcileSummary::default());
        }

        let id = self.agent.openstack_id().await?;
        let done = self.agent.client().transaction_status(&id, &pending).await?;
        debug!(pending = pending.len(), completed = done.len(), "transaction status polled");
        if done.is_empty() {
            return Ok(ReconcileSummary::default());
        }

        let summary = self.store.transactions_done(&done)?;
        info!(
            activated = summary.activated,
            deleted = summary.deleted,
            "transactions reconciled"
        );
        Ok(summary)
    }

    /// Poll every `interval` until `shutdown` flips.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "transaction poller started");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        error!(error = %e, "transaction poll failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("transaction poller shutting down");
                    break;
                }
            }
        }
    }
}
