//! fabricmap-binding: turns port lifecycle events of the orchestration
//! framework into fabric mappings, dynamic VLAN segments and SDN
//! transactions.

pub mod agent;
pub mod context;
pub mod driver;
pub mod error;
pub mod poller;
pub mod policy;
pub mod resolver;
pub mod type_driver;

#[cfg(test)]
pub(crate) mod testing;

pub use agent::{AgentFuture, MappingAgent, SdnMappingAgent};
pub use context::{AgentInfo, BindingLevel, HostAgents, PortContext, PortInventory};
pub use driver::{BindingDecision, FabricMechanismDriver, ProcessOutcome};
pub use error::{BindingError, BindingResult};
pub use poller::TransactionPoller;
pub use policy::EventKind;
pub use resolver::MappingResolver;
pub use type_driver::IsidTypeDriver;
