//! The `isid` network type: tenant and provider ISID allocation.

use fabric_core::segment::{
    validate_isid_provider_segment, NETWORK_TYPE, NETWORK_TYPE_ISID, PHYSICAL_NETWORK,
    SEGMENTATION_ID,
};
use fabric_core::{ConfigError, IdRange, SegmentAttrs};
use fabricmap_state::{IdAllocator, PoolStats, PoolSyncStats, StateError, StateStore};
use serde_json::Value;
use tracing::info;

use crate::error::BindingResult;

pub struct IsidTypeDriver {
    allocator: IdAllocator,
}

impl IsidTypeDriver {
    pub fn new(store: StateStore, ranges: Vec<IdRange>) -> Self {
        Self {
            allocator: IdAllocator::isid(store, ranges),
        }
    }

    pub fn get_type(&self) -> &'static str {
        NETWORK_TYPE_ISID
    }

    /// Bring the ISID pool in line with the configured ranges.
    pub fn initialize(&mut self) -> BindingResult<PoolSyncStats> {
        let stats = self.allocator.sync()?;
        info!(
            inserted = stats.inserted,
            removed = stats.removed,
            "isid type driver initialized"
        );
        Ok(stats)
    }

    pub fn validate_provider_segment(&self, segment: &SegmentAttrs) -> BindingResult<()> {
        Ok(validate_isid_provider_segment(segment)?)
    }

    pub fn is_partial_segment(&self, segment: &SegmentAttrs) -> bool {
        segment.get(SEGMENTATION_ID).is_none_or(Value::is_null)
    }

    /// Reserve the ISID a provider network asks for, or any free one when it
    /// leaves the id out.
    pub fn reserve_provider_segment(&self, segment: &SegmentAttrs) -> BindingResult<SegmentAttrs> {
        let id = if self.is_partial_segment(segment) {
            self.allocator.reserve_any()?
        } else {
            let id = segment
                .get(SEGMENTATION_ID)
                .and_then(Value::as_u64)
                .and_then(|id| u32::try_from(id).ok())
                .ok_or_else(|| {
                    ConfigError::InvalidSegment(format!("{SEGMENTATION_ID} is not a valid isid"))
                })?;
            self.allocator.reserve_specific(id)?
        };
        Ok(isid_attrs(id))
    }

    /// Allocate an ISID for a tenant network. `None` when the pool is
    /// exhausted.
    pub fn allocate_tenant_segment(&self) -> BindingResult<Option<SegmentAttrs>> {
        match self.allocator.reserve_any() {
            Ok(id) => Ok(Some(isid_attrs(id))),
            Err(StateError::PoolExhausted(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn release_segment(&self, segment: &SegmentAttrs) -> BindingResult<()> {
        let id = segment
            .get(SEGMENTATION_ID)
            .and_then(Value::as_u64)
            .and_then(|id| u32::try_from(id).ok())
            .ok_or_else(|| ConfigError::InvalidSegment(format!("{SEGMENTATION_ID} is missing")))?;
        Ok(self.allocator.release(id)?)
    }

    pub fn pool_stats(&self) -> BindingResult<PoolStats> {
        Ok(self.allocator.pool_stats()?)
    }
}

fn isid_attrs(id: u32) -> SegmentAttrs {
    let mut attrs = SegmentAttrs::new();
    attrs.insert(NETWORK_TYPE.into(), Value::from(NETWORK_TYPE_ISID));
    attrs.insert(PHYSICAL_NETWORK.into(), Value::Null);
    attrs.insert(SEGMENTATION_ID.into(), Value::from(id));
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BindingError;
    use serde_json::json;

    fn attrs(value: Value) -> SegmentAttrs {
        value.as_object().cloned().unwrap()
    }

    fn driver(min: u32, max: u32) -> IsidTypeDriver {
        let store = StateStore::open_in_memory().unwrap();
        let mut driver = IsidTypeDriver::new(store, vec![IdRange { min, max }]);
        let stats = driver.initialize().unwrap();
        assert_eq!(stats.inserted, u64::from(max - min + 1));
        driver
    }

    #[test]
    fn tenant_allocation_until_exhausted() {
        let d = driver(100, 101);
        let first = d.allocate_tenant_segment().unwrap().unwrap();
        assert_eq!(first[NETWORK_TYPE], json!("isid"));
        assert_eq!(first[PHYSICAL_NETWORK], Value::Null);
        d.allocate_tenant_segment().unwrap().unwrap();
        assert!(d.allocate_tenant_segment().unwrap().is_none());

        d.release_segment(&first).unwrap();
        let again = d.allocate_tenant_segment().unwrap().unwrap();
        assert_eq!(again[SEGMENTATION_ID], first[SEGMENTATION_ID]);
    }

    #[test]
    fn provider_segments() {
        let d = driver(100, 109);
        let partial = attrs(json!({"network_type": "isid"}));
        assert!(d.is_partial_segment(&partial));
        assert_eq!(d.reserve_provider_segment(&partial).unwrap()[SEGMENTATION_ID], json!(100));

        let specific = attrs(json!({"network_type": "isid", "segmentation_id": 105}));
        assert!(!d.is_partial_segment(&specific));
        d.reserve_provider_segment(&specific).unwrap();
        let err = d.reserve_provider_segment(&specific).unwrap_err();
        assert!(matches!(err, BindingError::State(StateError::AlreadyInUse { .. })));

        let stats = d.pool_stats().unwrap();
        assert_eq!((stats.total, stats.allocated), (10, 2));
    }

    #[test]
    fn provider_validation() {
        let d = driver(100, 100);
        assert_eq!(d.get_type(), "isid");
        assert!(d
            .validate_provider_segment(&attrs(json!({"network_type": "isid", "segmentation_id": 7})))
            .is_ok());
        let err = d
            .validate_provider_segment(&attrs(json!({
                "network_type": "isid",
                "physical_network": "physnet1",
            })))
            .unwrap_err();
        assert!(matches!(err, BindingError::InvalidSegment(_)));
    }
}
