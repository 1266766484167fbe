//! Identifier pools.
//!
//! A pool hands out identifiers from its configured ranges. Two layouts are
//! supported:
//!
//! - [`PoolKind::Dense`]: one row per identifier, created by [`IdAllocator::sync`].
//!   Free ids are picked in key order. Used for ISIDs.
//! - [`PoolKind::Sparse`]: rows exist only for allocated identifiers. Free ids
//!   are picked uniformly at random. Used for dynamic VLANs, one pool per
//!   physnet.
//!
//! Allocation walks the ordered key range of the pool and never loads the
//! whole pool. Callers must not depend on which free id `reserve_any`
//! returns.

use fabric_core::ranges::{in_ranges, merge_ranges, IdBounds, IdRange, ISID_BOUNDS, VLAN_BOUNDS};
use rand::Rng;
use redb::{ReadableDatabase, ReadableTable, WriteTransaction};
use tracing::{debug, info, warn};

use crate::error::{StateError, StateResult};
use crate::locks::pool_lock;
use crate::store::StateStore;
use crate::tables::ALLOCATIONS;
use crate::types::{IdAllocation, PoolStats, PoolSyncStats};

/// Rows deleted or inserted per batch during reconciliation.
pub const BULK_SIZE: usize = 100;

pub const ISID_POOL: &str = "isid";

/// Pool name of the dynamic VLANs of a physnet.
pub fn vlan_pool(physnet: &str) -> String {
    format!("vlan/{physnet}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    Dense,
    Sparse,
}

#[derive(Clone)]
pub struct IdAllocator {
    store: StateStore,
    pool: String,
    bounds: IdBounds,
    ranges: Vec<IdRange>,
    kind: PoolKind,
}

impl IdAllocator {
    /// The tenant ISID pool.
    pub fn isid(store: StateStore, ranges: Vec<IdRange>) -> Self {
        Self {
            store,
            pool: ISID_POOL.to_string(),
            bounds: ISID_BOUNDS,
            ranges,
            kind: PoolKind::Dense,
        }
    }

    /// The dynamic VLAN pool of `physnet`.
    pub fn vlan(store: StateStore, physnet: &str, range: IdRange) -> Self {
        Self {
            store,
            pool: vlan_pool(physnet),
            bounds: VLAN_BOUNDS,
            ranges: vec![range],
            kind: PoolKind::Sparse,
        }
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    pub fn ranges(&self) -> &[IdRange] {
        &self.ranges
    }

    pub fn kind(&self) -> PoolKind {
        self.kind
    }

    fn in_range(&self, id: u32) -> bool {
        in_ranges(&self.ranges, id)
    }

    /// Reserve exactly `id`.
    pub fn reserve_specific(&self, id: u32) -> StateResult<u32> {
        if !self.bounds.contains(id) {
            return Err(StateError::NotInPool {
                pool: self.pool.clone(),
                id,
            });
        }
        let txn = self.store.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;
            let key = (self.pool.as_str(), id);
            let allocated = table
                .get(key)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value());
            match (allocated, self.kind) {
                (Some(true), _) => {
                    return Err(StateError::AlreadyInUse {
                        pool: self.pool.clone(),
                        id,
                    });
                }
                (Some(false), _) if self.in_range(id) => {}
                (None, PoolKind::Sparse) if self.in_range(id) => {}
                _ => {
                    return Err(StateError::NotInPool {
                        pool: self.pool.clone(),
                        id,
                    });
                }
            }
            table.insert(key, true).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(pool = %self.pool, id, "id reserved");
        Ok(id)
    }

    /// Reserve any free id.
    pub fn reserve_any(&self) -> StateResult<u32> {
        let txn = self.store.db.begin_write().map_err(map_err!(Transaction))?;
        let id = self.reserve_any_in(&txn)?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(pool = %self.pool, id, "id reserved");
        Ok(id)
    }

    /// Reserve any free id inside a caller-owned write transaction.
    pub(crate) fn reserve_any_in(&self, txn: &WriteTransaction) -> StateResult<u32> {
        let mut table = txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;
        let id = match self.kind {
            PoolKind::Dense => first_free(&table, &self.pool, &self.ranges)?,
            PoolKind::Sparse => random_free(&table, &self.pool, &self.ranges)?,
        };
        let id = id.ok_or_else(|| StateError::PoolExhausted(self.pool.clone()))?;

        table
            .insert((self.pool.as_str(), id), true)
            .map_err(map_err!(Write))?;
        Ok(id)
    }

    /// Return `id` to the pool. Ids outside the current ranges are forgotten.
    pub fn release(&self, id: u32) -> StateResult<()> {
        let txn = self.store.db.begin_write().map_err(map_err!(Transaction))?;
        let found = self.release_in(&txn, id)?;
        txn.commit().map_err(map_err!(Transaction))?;
        if !found {
            warn!(pool = %self.pool, id, "released id not found");
        }
        Ok(())
    }

    /// Release inside a caller-owned write transaction. Returns whether the
    /// row existed.
    pub(crate) fn release_in(&self, txn: &WriteTransaction, id: u32) -> StateResult<bool> {
        let mut table = txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;
        let key = (self.pool.as_str(), id);
        let found = table.get(key).map_err(map_err!(Read))?.is_some();
        if !found {
            return Ok(false);
        }
        if self.kind == PoolKind::Dense && self.in_range(id) {
            table.insert(key, false).map_err(map_err!(Write))?;
            debug!(pool = %self.pool, id, "id returned to pool");
        } else {
            table.remove(key).map_err(map_err!(Write))?;
            debug!(pool = %self.pool, id, "id released outside pool");
        }
        Ok(true)
    }

    /// Bring the pool rows in line with `ranges`.
    ///
    /// Unallocated rows outside `ranges` are deleted and missing ids are
    /// inserted unallocated. Allocated rows are never touched. Runs in one
    /// write transaction under the pool lock.
    pub fn reconcile(&mut self, ranges: Vec<IdRange>) -> StateResult<PoolSyncStats> {
        self.ranges = ranges;
        if self.kind == PoolKind::Sparse {
            return Ok(PoolSyncStats::default());
        }

        let store = self.store.clone();
        let stats = store
            .locks()
            .with(&pool_lock(&self.pool), || self.reconcile_locked())?;
        info!(
            pool = %self.pool,
            ranges = ?self.ranges.iter().map(ToString::to_string).collect::<Vec<_>>(),
            inserted = stats.inserted,
            removed = stats.removed,
            "pool synchronized"
        );
        Ok(stats)
    }

    /// Reconcile against the ranges the allocator was built with.
    pub fn sync(&mut self) -> StateResult<PoolSyncStats> {
        let ranges = self.ranges.clone();
        self.reconcile(ranges)
    }

    fn reconcile_locked(&self) -> StateResult<PoolSyncStats> {
        let mut stats = PoolSyncStats::default();
        let txn = self.store.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;

            let mut to_remove = Vec::new();
            for entry in table
                .range(pool_keys(&self.pool))
                .map_err(map_err!(Read))?
            {
                let (key, value) = entry.map_err(map_err!(Read))?;
                let (_, id) = key.value();
                if !value.value() && !self.in_range(id) {
                    to_remove.push(id);
                }
            }
            for chunk in to_remove.chunks(BULK_SIZE) {
                for id in chunk {
                    table
                        .remove((self.pool.as_str(), *id))
                        .map_err(map_err!(Write))?;
                }
                stats.removed += chunk.len() as u64;
            }

            let missing = missing_ids(&table, &self.pool, &self.ranges)?;
            for chunk in missing.chunks(BULK_SIZE) {
                for id in chunk {
                    table
                        .insert((self.pool.as_str(), *id), false)
                        .map_err(map_err!(Write))?;
                }
                stats.inserted += chunk.len() as u64;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(stats)
    }

    pub fn allocation(&self, id: u32) -> StateResult<Option<IdAllocation>> {
        let txn = self.store.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;
        let allocated = table
            .get((self.pool.as_str(), id))
            .map_err(map_err!(Read))?
            .map(|guard| guard.value());
        Ok(allocated.map(|allocated| IdAllocation {
            pool: self.pool.clone(),
            id,
            allocated,
        }))
    }

    /// Every row of the pool in id order.
    pub fn allocations(&self) -> StateResult<Vec<IdAllocation>> {
        let txn = self.store.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;
        let rows = pool_rows(&table, &self.pool)?;
        Ok(rows
            .into_iter()
            .map(|(id, allocated)| IdAllocation {
                pool: self.pool.clone(),
                id,
                allocated,
            })
            .collect())
    }

    /// Row and allocation counts. Sparse pools report their capacity as the
    /// total.
    pub fn pool_stats(&self) -> StateResult<PoolStats> {
        let txn = self.store.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;
        let (mut rows, mut allocated, mut outside) = (0u64, 0u64, 0u64);
        for entry in table
            .range(pool_keys(&self.pool))
            .map_err(map_err!(Read))?
        {
            let (key, value) = entry.map_err(map_err!(Read))?;
            rows += 1;
            if value.value() {
                allocated += 1;
            }
            if !self.in_range(key.value().1) {
                outside += 1;
            }
        }
        let total = match self.kind {
            PoolKind::Dense => rows,
            PoolKind::Sparse => {
                merge_ranges(&self.ranges)
                    .iter()
                    .map(IdRange::count)
                    .sum::<u64>()
                    + outside
            }
        };
        Ok(PoolStats {
            pool: self.pool.clone(),
            total,
            allocated,
        })
    }
}

fn pool_keys(pool: &str) -> std::ops::RangeInclusive<(&str, u32)> {
    (pool, 0u32)..=(pool, u32::MAX)
}

/// `(id, allocated)` rows of one pool in key order.
fn pool_rows<T>(table: &T, pool: &str) -> StateResult<Vec<(u32, bool)>>
where
    T: ReadableTable<(&'static str, u32), bool>,
{
    let mut rows = Vec::new();
    for entry in table.range(pool_keys(pool)).map_err(map_err!(Read))? {
        let (key, value) = entry.map_err(map_err!(Read))?;
        let (_, id) = key.value();
        rows.push((id, value.value()));
    }
    Ok(rows)
}

/// Allocated ids of `pool` inside `range`, in order.
fn taken_ids<T>(table: &T, pool: &str, range: IdRange) -> StateResult<Vec<u32>>
where
    T: ReadableTable<(&'static str, u32), bool>,
{
    let mut taken = Vec::new();
    for entry in table
        .range((pool, range.min)..=(pool, range.max))
        .map_err(map_err!(Read))?
    {
        let (key, value) = entry.map_err(map_err!(Read))?;
        if value.value() {
            taken.push(key.value().1);
        }
    }
    Ok(taken)
}

/// Lowest unallocated row inside `ranges` of a dense pool.
fn first_free<T>(table: &T, pool: &str, ranges: &[IdRange]) -> StateResult<Option<u32>>
where
    T: ReadableTable<(&'static str, u32), bool>,
{
    for range in merge_ranges(ranges) {
        for entry in table
            .range((pool, range.min)..=(pool, range.max))
            .map_err(map_err!(Read))?
        {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !value.value() {
                return Ok(Some(key.value().1));
            }
        }
    }
    Ok(None)
}

/// Uniformly random id of `ranges` without an allocated row in a sparse
/// pool.
///
/// Memory is bounded by the number of allocated ids, not the size of the
/// ranges.
fn random_free<T>(table: &T, pool: &str, ranges: &[IdRange]) -> StateResult<Option<u32>>
where
    T: ReadableTable<(&'static str, u32), bool>,
{
    let mut gaps = Vec::new();
    let mut free = 0u64;
    for range in merge_ranges(ranges) {
        let taken = taken_ids(table, pool, range)?;
        free += range.count() - taken.len() as u64;
        gaps.push((range, taken));
    }
    if free == 0 {
        return Ok(None);
    }

    let mut n = rand::rng().random_range(0..free);
    for (range, taken) in gaps {
        let mut next = u64::from(range.min);
        for id in taken.into_iter().map(u64::from) {
            let gap = id - next;
            if n < gap {
                return Ok(u32::try_from(next + n).ok());
            }
            n -= gap;
            next = id + 1;
        }
        let gap = u64::from(range.max) + 1 - next;
        if n < gap {
            return Ok(u32::try_from(next + n).ok());
        }
        n -= gap;
    }
    Ok(None)
}

/// Ids of `ranges` with no row yet, in order.
fn missing_ids<T>(table: &T, pool: &str, ranges: &[IdRange]) -> StateResult<Vec<u32>>
where
    T: ReadableTable<(&'static str, u32), bool>,
{
    let mut missing = Vec::new();
    for range in merge_ranges(ranges) {
        let mut next = u64::from(range.min);
        for entry in table
            .range((pool, range.min)..=(pool, range.max))
            .map_err(map_err!(Read))?
        {
            let (key, _) = entry.map_err(map_err!(Read))?;
            let id = u64::from(key.value().1);
            missing.extend((next..id).filter_map(|i| u32::try_from(i).ok()));
            next = id + 1;
        }
        missing.extend((next..=u64::from(range.max)).filter_map(|i| u32::try_from(i).ok()));
    }
    Ok(missing)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(min: u32, max: u32) -> IdRange {
        IdRange { min, max }
    }

    fn isid_pool(store: &StateStore, ranges: Vec<IdRange>) -> IdAllocator {
        let mut alloc = IdAllocator::isid(store.clone(), ranges);
        alloc.sync().unwrap();
        alloc
    }

    #[test]
    fn sync_creates_one_row_per_id() {
        let store = StateStore::open_in_memory().unwrap();
        let alloc = isid_pool(&store, vec![range(100, 109), range(200, 204)]);
        let rows = alloc.allocations().unwrap();
        assert_eq!(rows.len(), 15);
        assert!(rows.iter().all(|a| !a.allocated));
    }

    #[test]
    fn sync_is_idempotent() {
        let store = StateStore::open_in_memory().unwrap();
        let mut alloc = isid_pool(&store, vec![range(1, 250)]);
        let stats = alloc.sync().unwrap();
        assert_eq!(stats, PoolSyncStats::default());
        assert_eq!(alloc.allocations().unwrap().len(), 250);
    }

    #[test]
    fn overlapping_ranges_counted_once() {
        let store = StateStore::open_in_memory().unwrap();
        let alloc = isid_pool(&store, vec![range(10, 20), range(15, 25)]);
        assert_eq!(alloc.allocations().unwrap().len(), 16);
    }

    #[test]
    fn reserve_specific_then_in_use() {
        let store = StateStore::open_in_memory().unwrap();
        let alloc = isid_pool(&store, vec![range(100, 109)]);

        assert_eq!(alloc.reserve_specific(105).unwrap(), 105);
        assert!(matches!(
            alloc.reserve_specific(105),
            Err(StateError::AlreadyInUse { id: 105, .. })
        ));
        assert!(matches!(
            alloc.reserve_specific(500),
            Err(StateError::NotInPool { id: 500, .. })
        ));
    }

    #[test]
    fn reserve_any_until_exhausted() {
        let store = StateStore::open_in_memory().unwrap();
        let alloc = isid_pool(&store, vec![range(1, 3)]);

        let mut got: Vec<u32> = (0..3).map(|_| alloc.reserve_any().unwrap()).collect();
        got.sort_unstable();
        assert_eq!(got, vec![1, 2, 3]);
        assert!(matches!(
            alloc.reserve_any(),
            Err(StateError::PoolExhausted(_))
        ));
    }

    #[test]
    fn reserve_then_release_restores_row() {
        let store = StateStore::open_in_memory().unwrap();
        let alloc = isid_pool(&store, vec![range(100, 109)]);
        let before = alloc.allocations().unwrap().len();

        let id = alloc.reserve_any().unwrap();
        assert!(alloc.allocation(id).unwrap().unwrap().allocated);
        alloc.release(id).unwrap();

        assert!(!alloc.allocation(id).unwrap().unwrap().allocated);
        assert_eq!(alloc.allocations().unwrap().len(), before);
    }

    #[test]
    fn release_missing_id_is_noop() {
        let store = StateStore::open_in_memory().unwrap();
        let alloc = isid_pool(&store, vec![range(1, 5)]);
        alloc.release(999).unwrap();
        assert_eq!(alloc.allocations().unwrap().len(), 5);
    }

    #[test]
    fn reconfigure_keeps_allocated_leftovers() {
        let store = StateStore::open_in_memory().unwrap();
        let mut alloc = isid_pool(&store, vec![range(100, 109)]);
        alloc.reserve_specific(105).unwrap();
        alloc.reserve_specific(101).unwrap();

        let stats = alloc.reconcile(vec![range(105, 114)]).unwrap();
        assert_eq!(stats.inserted, 5);
        // 100, 102, 103, 104 pruned; 101 kept because it is allocated.
        assert_eq!(stats.removed, 4);

        let rows = alloc.allocations().unwrap();
        // |new ids| + allocated leftovers outside the new ranges
        assert_eq!(rows.len(), 10 + 1);
        assert!(alloc.allocation(101).unwrap().unwrap().allocated);
        assert!(alloc.allocation(105).unwrap().unwrap().allocated);
        assert!(alloc.allocation(100).unwrap().is_none());
    }

    #[test]
    fn releasing_out_of_range_id_removes_row() {
        let store = StateStore::open_in_memory().unwrap();
        let mut alloc = isid_pool(&store, vec![range(100, 109)]);
        alloc.reserve_specific(101).unwrap();
        alloc.reconcile(vec![range(105, 114)]).unwrap();

        alloc.release(101).unwrap();
        assert!(alloc.allocation(101).unwrap().is_none());
        assert_eq!(alloc.allocations().unwrap().len(), 10);
        // A leftover can never be handed out again.
        assert!(matches!(
            alloc.reserve_specific(101),
            Err(StateError::NotInPool { .. })
        ));
    }

    #[test]
    fn reconcile_larger_than_bulk_size() {
        let store = StateStore::open_in_memory().unwrap();
        let mut alloc = isid_pool(&store, vec![range(0, 349)]);
        let stats = alloc.reconcile(vec![range(1000, 1099)]).unwrap();
        assert_eq!(stats.removed, 350);
        assert_eq!(stats.inserted, 100);
        assert_eq!(alloc.pool_stats().unwrap().total, 100);
    }

    #[test]
    fn pools_are_isolated() {
        let store = StateStore::open_in_memory().unwrap();
        let isids = isid_pool(&store, vec![range(1, 10)]);
        let vlans = IdAllocator::vlan(store.clone(), "physnet1", range(1, 10));

        vlans.reserve_specific(5).unwrap();
        assert!(!isids.allocation(5).unwrap().unwrap().allocated);
        assert_eq!(isids.allocations().unwrap().len(), 10);
    }

    #[test]
    fn sparse_pool_reserve_and_release() {
        let store = StateStore::open_in_memory().unwrap();
        let vlans = IdAllocator::vlan(store.clone(), "physnet1", range(100, 102));
        assert!(vlans.allocations().unwrap().is_empty());

        let mut got: Vec<u32> = (0..3).map(|_| vlans.reserve_any().unwrap()).collect();
        got.sort_unstable();
        assert_eq!(got, vec![100, 101, 102]);
        assert!(matches!(
            vlans.reserve_any(),
            Err(StateError::PoolExhausted(_))
        ));

        vlans.release(101).unwrap();
        assert!(vlans.allocation(101).unwrap().is_none());
        assert_eq!(vlans.reserve_any().unwrap(), 101);

        let stats = vlans.pool_stats().unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.allocated, 3);
    }

    #[test]
    fn dense_reserve_any_takes_lowest_free_id() {
        let store = StateStore::open_in_memory().unwrap();
        let alloc = isid_pool(&store, vec![range(200, 201), range(100, 101)]);
        alloc.reserve_specific(100).unwrap();

        assert_eq!(alloc.reserve_any().unwrap(), 101);
        assert_eq!(alloc.reserve_any().unwrap(), 200);
        alloc.release(101).unwrap();
        assert_eq!(alloc.reserve_any().unwrap(), 101);
    }

    #[test]
    fn sparse_reserve_any_finds_remaining_gaps() {
        let store = StateStore::open_in_memory().unwrap();
        let vlans = IdAllocator::vlan(store, "physnet1", range(100, 199));
        for id in (100..=199).filter(|id| *id != 123 && *id != 187) {
            vlans.reserve_specific(id).unwrap();
        }

        let mut got = vec![vlans.reserve_any().unwrap(), vlans.reserve_any().unwrap()];
        got.sort_unstable();
        assert_eq!(got, vec![123, 187]);
        assert!(matches!(
            vlans.reserve_any(),
            Err(StateError::PoolExhausted(_))
        ));
    }

    #[test]
    fn sparse_reserve_any_stays_in_range() {
        let store = StateStore::open_in_memory().unwrap();
        let vlans = IdAllocator::vlan(store, "physnet1", range(1, 4094));
        for _ in 0..50 {
            let id = vlans.reserve_any().unwrap();
            assert!((1..=4094).contains(&id));
        }
        let stats = vlans.pool_stats().unwrap();
        assert_eq!(stats.total, 4094);
        assert_eq!(stats.allocated, 50);
    }

    #[test]
    fn sparse_pool_rejects_out_of_range() {
        let store = StateStore::open_in_memory().unwrap();
        let vlans = IdAllocator::vlan(store, "physnet1", range(100, 199));
        assert!(matches!(
            vlans.reserve_specific(300),
            Err(StateError::NotInPool { .. })
        ));
        assert!(matches!(
            vlans.reserve_specific(5000),
            Err(StateError::NotInPool { .. })
        ));
    }
}
