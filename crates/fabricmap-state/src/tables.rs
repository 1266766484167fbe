//! redb table definitions for the fabricmap state store.
//!
//! Mapping, topology and segment rows are JSON-serialized into `&[u8]`
//! columns. Allocation rows and the transaction index are small enough to
//! use native redb key and value types.

use redb::TableDefinition;

/// Identifier pool rows keyed by `(pool, id)`. Value is the allocated flag.
pub const ALLOCATIONS: TableDefinition<(&str, u32), bool> = TableDefinition::new("allocations");

/// Host/network mappings keyed by `(host, network_id)`.
pub const HOST_NETWORK_MAPPINGS: TableDefinition<(&str, &str), &[u8]> =
    TableDefinition::new("host_network_mappings");

/// Unique index from SDN transaction id to its `(host, network_id)` mapping.
pub const MAPPING_TRANSACTIONS: TableDefinition<&str, (&str, &str)> =
    TableDefinition::new("mapping_transactions");

/// Discovered switch attachments keyed by `(switch, port)`.
pub const SWITCH_DYNAMIC_MAPPINGS: TableDefinition<(&str, &str), &[u8]> =
    TableDefinition::new("switch_dynamic_mappings");

/// Dynamic VLAN segments keyed by `(network_id, physnet)`.
pub const DYNAMIC_SEGMENTS: TableDefinition<(&str, &str), &[u8]> =
    TableDefinition::new("dynamic_segments");

/// Ports bound to a host, keyed by `(network_id, host, port_id)`. Value is
/// the bind time in epoch seconds.
pub const BOUND_PORTS: TableDefinition<(&str, &str, &str), u64> =
    TableDefinition::new("bound_ports");

/// Singleton values such as the SDN registration id.
pub const REGISTRATION: TableDefinition<&str, &str> = TableDefinition::new("registration");
