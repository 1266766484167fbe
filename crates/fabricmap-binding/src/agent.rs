//! Submission of fabric mappings to the SDN backend.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use fabric_core::FabricMapping;
use fabricmap_sdn::{SdnClient, SdnError};
use fabricmap_state::StateStore;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::error::BindingResult;

/// Future returned by [`MappingAgent`] calls; resolves to a transaction id.
pub type AgentFuture<'a> = Pin<Box<dyn Future<Output = BindingResult<String>> + Send + 'a>>;

/// Something that can provision and retire fabric mappings.
pub trait MappingAgent: Send + Sync {
    fn create_mapping<'a>(&'a self, mapping: &'a FabricMapping) -> AgentFuture<'a>;

    fn delete_mapping<'a>(&'a self, mapping: &'a FabricMapping) -> AgentFuture<'a>;
}

impl<T: MappingAgent + ?Sized> MappingAgent for Arc<T> {
    fn create_mapping<'a>(&'a self, mapping: &'a FabricMapping) -> AgentFuture<'a> {
        (**self).create_mapping(mapping)
    }

    fn delete_mapping<'a>(&'a self, mapping: &'a FabricMapping) -> AgentFuture<'a> {
        (**self).delete_mapping(mapping)
    }
}

/// [`MappingAgent`] backed by the SDN controller.
///
/// Registers lazily on first use. Submitted transactions are tracked through
/// the store's transaction index once the mapping claim commits, so any
/// number of agents may share one store and one poller.
pub struct SdnMappingAgent {
    client: SdnClient,
    store: StateStore,
    openstack_id: OnceCell<String>,
}

impl SdnMappingAgent {
    pub fn new(client: SdnClient, store: StateStore) -> Self {
        Self {
            client,
            store,
            openstack_id: OnceCell::new(),
        }
    }

    pub fn client(&self) -> &SdnClient {
        &self.client
    }

    /// Registration id used in every SDN path.
    ///
    /// The controller is asked once per process. The first id ever stored
    /// wins; a stored id is also used when the controller is unreachable.
    pub async fn openstack_id(&self) -> BindingResult<String> {
        let id = self.openstack_id.get_or_try_init(|| self.register()).await?;
        Ok(id.clone())
    }

    async fn register(&self) -> BindingResult<String> {
        let stored = self.store.registration_id()?;
        match self.client.register().await {
            Ok(id) => Ok(self.store.store_registration_id(&id)?),
            Err(e) => match stored {
                Some(id) => {
                    warn!(error = %e, %id, "SDN registration failed, using stored id");
                    Ok(id)
                }
                None => Err(e.into()),
            },
        }
    }
}

fn accepted(action: &str, mapping: &FabricMapping, tx_id: String) -> BindingResult<String> {
    if tx_id.is_empty() {
        return Err(SdnError::MissingTransactionId(format!(
            "{action} for host {} on {}",
            mapping.host, mapping.physnet
        ))
        .into());
    }
    info!(
        host = %mapping.host,
        physnet = %mapping.physnet,
        vlan = mapping.vlan,
        isid = ?mapping.isid,
        %tx_id,
        "{action} submitted"
    );
    Ok(tx_id)
}

impl MappingAgent for SdnMappingAgent {
    fn create_mapping<'a>(&'a self, mapping: &'a FabricMapping) -> AgentFuture<'a> {
        Box::pin(async move {
            let id = self.openstack_id().await?;
            let tx_id = self.client.create_network(&id, mapping).await?;
            accepted("create", mapping, tx_id)
        })
    }

    fn delete_mapping<'a>(&'a self, mapping: &'a FabricMapping) -> AgentFuture<'a> {
        Box::pin(async move {
            let id = self.openstack_id().await?;
            let tx_id = self.client.delete_network(&id, mapping).await?;
            accepted("delete", mapping, tx_id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BindingError;
    use crate::testing::{fake_sdn, sdn_client};

    fn mapping() -> FabricMapping {
        let mut mapping = FabricMapping::new("compute-1", "physnet1", 100, Some(20001));
        mapping.switch_ports.insert(("sw1".into(), "1/1".into()));
        mapping.management_ip = Some("10.0.0.11".into());
        mapping.bridge_name = Some("br-eth1".into());
        mapping
    }

    #[tokio::test]
    async fn submissions_return_transaction_ids() {
        let store = StateStore::open_in_memory().unwrap();
        let agent = SdnMappingAgent::new(sdn_client(fake_sdn("os-1", true)).await, store.clone());

        let created = agent.create_mapping(&mapping()).await.unwrap();
        let deleted = agent.delete_mapping(&mapping()).await.unwrap();
        assert_eq!(created, "tx-create");
        assert_eq!(deleted, "tx-delete");
        assert_eq!(store.registration_id().unwrap().as_deref(), Some("os-1"));
    }

    #[tokio::test]
    async fn stored_registration_id_wins() {
        let store = StateStore::open_in_memory().unwrap();
        store.store_registration_id("os-old").unwrap();
        let agent = SdnMappingAgent::new(sdn_client(fake_sdn("os-new", true)).await, store);
        assert_eq!(agent.openstack_id().await.unwrap(), "os-old");
    }

    #[tokio::test]
    async fn missing_location_is_an_error() {
        let store = StateStore::open_in_memory().unwrap();
        let agent = SdnMappingAgent::new(sdn_client(fake_sdn("os-1", false)).await, store);
        let err = agent.create_mapping(&mapping()).await.unwrap_err();
        assert!(matches!(
            err,
            BindingError::Sdn(SdnError::MissingTransactionId(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_controller_without_registration_fails() {
        let store = StateStore::open_in_memory().unwrap();
        let client = SdnClient::new(
            "http://127.0.0.1:1",
            "admin",
            "secret",
            std::time::Duration::from_secs(2),
        )
        .unwrap();
        let agent = SdnMappingAgent::new(client, store);
        assert!(matches!(
            agent.openstack_id().await,
            Err(BindingError::Sdn(_))
        ));
    }
}
