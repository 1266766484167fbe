//! fabric-core: configuration, identifier ranges, segments and host topology
//! shared by every fabricmap crate.

pub mod config;
pub mod error;
pub mod mapping;
pub mod ranges;
pub mod segment;
pub mod topology;

pub use config::FabricConfig;
pub use error::{ConfigError, ConfigResult};
pub use mapping::FabricMapping;
pub use ranges::{IdBounds, IdRange, ISID_BOUNDS, VLAN_BOUNDS};
pub use segment::{DynamicSegmentSpec, Segment, SegmentAttrs};
pub use topology::{PhysnetPorts, StaticHostConfig, StaticMappings, SwitchPort};
