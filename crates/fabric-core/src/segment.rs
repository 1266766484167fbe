//! Network segments.
//!
//! The orchestration framework hands segments around as untyped attribute
//! maps. They are converted to [`Segment`] at the boundary and converted back
//! with [`DynamicSegmentSpec::to_attrs`] when a binding decision is returned.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ConfigError, ConfigResult};
use crate::ranges::{ISID_BOUNDS, VLAN_BOUNDS};

/// Untyped segment attributes as exchanged with the orchestration framework.
pub type SegmentAttrs = Map<String, Value>;

pub const NETWORK_TYPE_ISID: &str = "isid";
pub const NETWORK_TYPE_VLAN: &str = "vlan";

pub const NETWORK_TYPE: &str = "network_type";
pub const PHYSICAL_NETWORK: &str = "physical_network";
pub const SEGMENTATION_ID: &str = "segmentation_id";
pub const SEGMENT_ID: &str = "id";
pub const MTU: &str = "mtu";

/// A typed network segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Fabric service segment identified by an ISID.
    Isid { id: u32 },
    /// 802.1Q segment on a physical network.
    Vlan { physnet: String, id: u32 },
    /// Any segment type the fabric does not handle.
    Other { network_type: String },
}

impl Segment {
    /// Convert framework attributes into a typed segment.
    ///
    /// ISID and VLAN segments must carry a valid segmentation id; VLAN
    /// segments also need a physical network.
    pub fn from_attrs(attrs: &SegmentAttrs) -> ConfigResult<Self> {
        let network_type = attrs
            .get(NETWORK_TYPE)
            .and_then(Value::as_str)
            .ok_or_else(|| ConfigError::InvalidSegment(format!("{NETWORK_TYPE} is missing")))?;

        match network_type {
            NETWORK_TYPE_ISID => {
                let id = segmentation_id(attrs)?;
                if !ISID_BOUNDS.contains(id) {
                    return Err(ConfigError::InvalidSegment(format!(
                        "{id} is not a valid isid"
                    )));
                }
                Ok(Segment::Isid { id })
            }
            NETWORK_TYPE_VLAN => {
                let physnet = attrs
                    .get(PHYSICAL_NETWORK)
                    .and_then(Value::as_str)
                    .filter(|p| !p.is_empty())
                    .ok_or_else(|| {
                        ConfigError::InvalidSegment(format!(
                            "vlan segment without {PHYSICAL_NETWORK}"
                        ))
                    })?;
                let id = segmentation_id(attrs)?;
                if !VLAN_BOUNDS.contains(id) {
                    return Err(ConfigError::InvalidSegment(format!(
                        "{id} is not a valid vlan"
                    )));
                }
                Ok(Segment::Vlan {
                    physnet: physnet.to_string(),
                    id,
                })
            }
            other => Ok(Segment::Other {
                network_type: other.to_string(),
            }),
        }
    }

    pub fn network_type(&self) -> &str {
        match self {
            Segment::Isid { .. } => NETWORK_TYPE_ISID,
            Segment::Vlan { .. } => NETWORK_TYPE_VLAN,
            Segment::Other { network_type } => network_type.as_str(),
        }
    }

    pub fn is_isid(&self) -> bool {
        matches!(self, Segment::Isid { .. })
    }

    /// ISID or VLAN: the segment types the fabric provisions.
    pub fn is_fabric_managed(&self) -> bool {
        matches!(self, Segment::Isid { .. } | Segment::Vlan { .. })
    }
}

fn segmentation_id(attrs: &SegmentAttrs) -> ConfigResult<u32> {
    attrs
        .get(SEGMENTATION_ID)
        .and_then(Value::as_u64)
        .and_then(|id| u32::try_from(id).ok())
        .ok_or_else(|| ConfigError::InvalidSegment(format!("{SEGMENTATION_ID} is missing or invalid")))
}

/// Validate a provider-supplied ISID segment.
///
/// Only `network_type` and `segmentation_id` may be set; a physical network
/// makes no sense for a fabric-wide service identifier.
pub fn validate_isid_provider_segment(attrs: &SegmentAttrs) -> ConfigResult<()> {
    let has_value = |v: &Value| !v.is_null() && v.as_str() != Some("");

    if attrs.get(PHYSICAL_NETWORK).is_some_and(has_value) {
        return Err(ConfigError::InvalidSegment(format!(
            "{PHYSICAL_NETWORK} specified for {NETWORK_TYPE_ISID} network"
        )));
    }
    for (key, value) in attrs {
        if has_value(value) && key != NETWORK_TYPE && key != SEGMENTATION_ID {
            return Err(ConfigError::InvalidSegment(format!(
                "{key} prohibited for {NETWORK_TYPE_ISID} provider network"
            )));
        }
    }
    if let Some(id) = attrs.get(SEGMENTATION_ID).filter(|v| !v.is_null()) {
        let valid = id
            .as_u64()
            .and_then(|id| u32::try_from(id).ok())
            .is_some_and(|id| ISID_BOUNDS.contains(id));
        if !valid {
            return Err(ConfigError::InvalidSegment(format!("{id} is not a valid isid")));
        }
    }
    Ok(())
}

/// A dynamic segment handed back to the framework to continue binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicSegmentSpec {
    pub network_type: String,
    pub physical_network: String,
    pub segmentation_id: u32,
    pub mtu: u32,
}

impl DynamicSegmentSpec {
    pub fn vlan(physical_network: &str, segmentation_id: u32, mtu: u32) -> Self {
        Self {
            network_type: NETWORK_TYPE_VLAN.to_string(),
            physical_network: physical_network.to_string(),
            segmentation_id,
            mtu,
        }
    }

    pub fn to_attrs(&self) -> SegmentAttrs {
        let mut attrs = Map::new();
        attrs.insert(NETWORK_TYPE.into(), Value::from(self.network_type.clone()));
        attrs.insert(
            PHYSICAL_NETWORK.into(),
            Value::from(self.physical_network.clone()),
        );
        attrs.insert(SEGMENTATION_ID.into(), Value::from(self.segmentation_id));
        attrs.insert(MTU.into(), Value::from(self.mtu));
        attrs
    }
}
