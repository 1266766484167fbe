//! Dynamic VLAN segments underlaying ISID networks.
//!
//! The first port of an ISID network bound on a physnet allocates a VLAN
//! from that physnet's dynamic pool. Later ports of the same network on the
//! same physnet reuse it.

use std::collections::HashMap;

use fabric_core::ranges::IdRange;
use redb::{ReadableDatabase, ReadableTable};
use tracing::{debug, info};

use crate::allocator::IdAllocator;
use crate::error::{StateError, StateResult};
use crate::locks::segment_lock;
use crate::store::StateStore;
use crate::tables::DYNAMIC_SEGMENTS;
use crate::types::DynamicSegment;

#[derive(Clone)]
pub struct DynamicSegments {
    store: StateStore,
    vlan_range: IdRange,
    mtus: HashMap<String, u32>,
    default_mtu: u32,
}

impl DynamicSegments {
    pub fn new(
        store: StateStore,
        vlan_range: IdRange,
        mtus: HashMap<String, u32>,
        default_mtu: u32,
    ) -> Self {
        Self {
            store,
            vlan_range,
            mtus,
            default_mtu,
        }
    }

    fn pool(&self, physnet: &str) -> IdAllocator {
        IdAllocator::vlan(self.store.clone(), physnet, self.vlan_range)
    }

    fn mtu(&self, physnet: &str) -> u32 {
        self.mtus.get(physnet).copied().unwrap_or(self.default_mtu)
    }

    /// Segment of `network_id` on the first usable physnet of `candidates`.
    ///
    /// An existing segment on any candidate wins. Otherwise a VLAN is
    /// reserved on the first candidate whose pool is not exhausted. Returns
    /// `None` when no candidate has a free VLAN.
    pub fn allocate(
        &self,
        network_id: &str,
        candidates: &[String],
    ) -> StateResult<Option<DynamicSegment>> {
        self.store.locks().with(&segment_lock(network_id), || {
            let txn = self.store.db.begin_write().map_err(map_err!(Transaction))?;
            let segment = {
                let mut table = txn.open_table(DYNAMIC_SEGMENTS).map_err(map_err!(Table))?;
                for physnet in candidates {
                    if let Some(existing) = read_segment(&table, network_id, physnet)? {
                        debug!(network = %network_id, %physnet, vlan = existing.vlan, "reusing dynamic segment");
                        return Ok(Some(existing));
                    }
                }

                let mut allocated = None;
                for physnet in candidates {
                    match self.pool(physnet).reserve_any_in(&txn) {
                        Ok(vlan) => {
                            allocated = Some(DynamicSegment {
                                network_id: network_id.to_string(),
                                physnet: physnet.clone(),
                                vlan,
                                mtu: self.mtu(physnet),
                            });
                            break;
                        }
                        Err(StateError::PoolExhausted(pool)) => {
                            debug!(%pool, "no free vlan, trying next physnet");
                        }
                        Err(e) => return Err(e),
                    }
                }
                if let Some(segment) = &allocated {
                    let value = serde_json::to_vec(segment).map_err(map_err!(Serialize))?;
                    table
                        .insert(
                            (segment.network_id.as_str(), segment.physnet.as_str()),
                            value.as_slice(),
                        )
                        .map_err(map_err!(Write))?;
                }
                allocated
            };
            txn.commit().map_err(map_err!(Transaction))?;
            if let Some(segment) = &segment {
                info!(
                    network = %network_id,
                    physnet = %segment.physnet,
                    vlan = segment.vlan,
                    "dynamic segment allocated"
                );
            }
            Ok(segment)
        })
    }

    pub fn get(&self, network_id: &str, physnet: &str) -> StateResult<Option<DynamicSegment>> {
        let txn = self.store.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DYNAMIC_SEGMENTS).map_err(map_err!(Table))?;
        read_segment(&table, network_id, physnet)
    }

    /// Every dynamic segment of `network_id`.
    pub fn list(&self, network_id: &str) -> StateResult<Vec<DynamicSegment>> {
        let txn = self.store.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DYNAMIC_SEGMENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table
            .range((network_id, "")..)
            .map_err(map_err!(Read))?
        {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().0 != network_id {
                break;
            }
            let segment: DynamicSegment =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(segment);
        }
        Ok(results)
    }

    /// Release every dynamic segment of `network_id` back to its pool.
    pub fn release_network(&self, network_id: &str) -> StateResult<Vec<DynamicSegment>> {
        self.store.locks().with(&segment_lock(network_id), || {
            let segments = self.list(network_id)?;
            if segments.is_empty() {
                return Ok(segments);
            }
            let txn = self.store.db.begin_write().map_err(map_err!(Transaction))?;
            {
                let mut table = txn.open_table(DYNAMIC_SEGMENTS).map_err(map_err!(Table))?;
                for segment in &segments {
                    table
                        .remove((segment.network_id.as_str(), segment.physnet.as_str()))
                        .map_err(map_err!(Write))?;
                }
            }
            for segment in &segments {
                self.pool(&segment.physnet).release_in(&txn, segment.vlan)?;
            }
            txn.commit().map_err(map_err!(Transaction))?;
            info!(network = %network_id, count = segments.len(), "dynamic segments released");
            Ok(segments)
        })
    }
}

fn read_segment<T>(table: &T, network_id: &str, physnet: &str) -> StateResult<Option<DynamicSegment>>
where
    T: ReadableTable<(&'static str, &'static str), &'static [u8]>,
{
    match table.get((network_id, physnet)).map_err(map_err!(Read))? {
        Some(guard) => {
            let segment: DynamicSegment =
                serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
            Ok(Some(segment))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segments(store: &StateStore, min: u32, max: u32) -> DynamicSegments {
        let mut mtus = HashMap::new();
        mtus.insert("physnet2".to_string(), 9000);
        DynamicSegments::new(store.clone(), IdRange { min, max }, mtus, 1500)
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn allocate_then_reuse() {
        let store = StateStore::open_in_memory().unwrap();
        let segs = segments(&store, 100, 199);

        let first = segs.allocate("n1", &names(&["physnet1"])).unwrap().unwrap();
        assert!((100..=199).contains(&first.vlan));
        assert_eq!(first.mtu, 1500);

        let again = segs.allocate("n1", &names(&["physnet1"])).unwrap().unwrap();
        assert_eq!(again, first);
        assert_eq!(segs.list("n1").unwrap().len(), 1);
    }

    #[test]
    fn existing_segment_preferred_over_first_candidate() {
        let store = StateStore::open_in_memory().unwrap();
        let segs = segments(&store, 100, 199);
        let on_p2 = segs.allocate("n1", &names(&["physnet2"])).unwrap().unwrap();
        assert_eq!(on_p2.mtu, 9000);

        let chosen = segs
            .allocate("n1", &names(&["physnet1", "physnet2"]))
            .unwrap()
            .unwrap();
        assert_eq!(chosen, on_p2);
    }

    #[test]
    fn exhausted_physnet_falls_through() {
        let store = StateStore::open_in_memory().unwrap();
        let segs = segments(&store, 100, 100);

        let a = segs.allocate("n1", &names(&["physnet1"])).unwrap().unwrap();
        assert_eq!(a.vlan, 100);
        let b = segs
            .allocate("n2", &names(&["physnet1", "physnet2"]))
            .unwrap()
            .unwrap();
        assert_eq!(b.physnet, "physnet2");

        assert!(segs.allocate("n3", &names(&["physnet1", "physnet2"])).unwrap().is_none());
    }

    #[test]
    fn networks_get_distinct_vlans() {
        let store = StateStore::open_in_memory().unwrap();
        let segs = segments(&store, 100, 109);
        let mut vlans: Vec<u32> = (0..10)
            .map(|i| {
                segs.allocate(&format!("n{i}"), &names(&["physnet1"]))
                    .unwrap()
                    .unwrap()
                    .vlan
            })
            .collect();
        vlans.sort_unstable();
        vlans.dedup();
        assert_eq!(vlans.len(), 10);
    }

    #[test]
    fn release_returns_vlans() {
        let store = StateStore::open_in_memory().unwrap();
        let segs = segments(&store, 100, 100);
        segs.allocate("n1", &names(&["physnet1"])).unwrap().unwrap();
        segs.allocate("n1", &names(&["physnet2"])).unwrap().unwrap();
        assert_eq!(segs.list("n1").unwrap().len(), 2);

        let released = segs.release_network("n1").unwrap();
        assert_eq!(released.len(), 2);
        assert!(segs.list("n1").unwrap().is_empty());
        assert!(segs.get("n1", "physnet1").unwrap().is_none());

        // The single vlan is free again.
        assert!(segs.allocate("n2", &names(&["physnet1"])).unwrap().is_some());
        assert!(segs.release_network("missing").unwrap().is_empty());
    }

    #[test]
    fn list_does_not_leak_other_networks() {
        let store = StateStore::open_in_memory().unwrap();
        let segs = segments(&store, 100, 199);
        segs.allocate("n1", &names(&["physnet1"])).unwrap();
        segs.allocate("n10", &names(&["physnet1"])).unwrap();
        segs.allocate("n2", &names(&["physnet1"])).unwrap();

        let n1 = segs.list("n1").unwrap();
        assert_eq!(n1.len(), 1);
        assert_eq!(n1[0].network_id, "n1");
    }
}
