//! Partitions: resource-id shards, each with its own mutex, lock maps and
//! free lists.
//!
//! # Lock Ordering
//!
//! A thread holds at most one partition mutex at a time, except during a
//! [`WorldPause`], which takes every partition mutex in ascending index
//! order. Two concurrent pauses therefore cannot deadlock each other, and a
//! pause never waits on a thread that is itself waiting for a pause.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use rustc_hash::FxHashMap;

use crate::client::ClientState;
use crate::counters::LockCounters;
use crate::error::{LockError, Result};
use crate::mode::{AcquireMode, LockMode};
use crate::pool::Pool;
use crate::resource::ResourceKey;
use crate::table::entry::{ClientEntry, EntryIndex, EntryTable};
use crate::table::lock::{AcquireOutcome, Lock, LockIndex, LockState};

/// One shard of the lock table.
pub(crate) struct Partition {
    index: usize,
    locks: Pool<Lock>,
    pub(crate) entries: EntryTable,
    /// One map per resource type, keyed by resource id.
    maps: Vec<FxHashMap<u64, LockIndex>>,
    counters: Arc<LockCounters>,
}

impl Partition {
    pub(crate) fn new(index: usize, resource_types: usize, counters: Arc<LockCounters>) -> Self {
        Self {
            index,
            locks: Pool::default(),
            entries: EntryTable::new(index),
            maps: (0..resource_types).map(|_| FxHashMap::default()).collect(),
            counters,
        }
    }

    pub(crate) const fn index(&self) -> usize {
        self.index
    }

    fn map(&self, key: ResourceKey) -> &FxHashMap<u64, LockIndex> {
        &self.maps[key.resource_type.id() as usize]
    }

    fn map_mut(&mut self, key: ResourceKey) -> &mut FxHashMap<u64, LockIndex> {
        &mut self.maps[key.resource_type.id() as usize]
    }

    /// Returns the lock for `key`, creating or recycling one if needed.
    pub(crate) fn get_or_create_lock(&mut self, key: ResourceKey) -> LockIndex {
        if let Some(&index) = self.map(key).get(&key.resource_id) {
            return index;
        }
        let (index, recycled) = self.locks.allocate();
        if recycled {
            self.counters.record_lock_recycled();
            tracing::trace!(partition = self.index, resource = %key, "recycled lock");
        }
        self.locks[index].resource = Some(key);
        self.map_mut(key).insert(key.resource_id, index);
        index
    }

    /// Looks up the live lock for `key`.
    pub(crate) fn lock_for(&self, key: ResourceKey) -> Option<LockIndex> {
        self.map(key).get(&key.resource_id).copied()
    }

    pub(crate) fn lock(&self, index: LockIndex) -> &Lock {
        &self.locks[index]
    }

    /// Evicts the idle lock for `key` and returns it to the free list.
    pub(crate) fn remove_lock(&mut self, key: ResourceKey) -> Result<()> {
        let Some(index) = self.lock_for(key) else {
            return Err(LockError::invariant(format!(
                "removing lock {key} that is not in partition {}",
                self.index
            )));
        };
        if !self.locks[index].is_idle() {
            return Err(LockError::invariant(format!(
                "removing lock {key} that still has holders or waiters"
            )));
        }
        self.map_mut(key).remove(&key.resource_id);
        self.locks.deallocate(index);
        Ok(())
    }

    pub(crate) fn new_client_entry(
        &mut self,
        owner: Arc<ClientState>,
        mode: LockMode,
        key: ResourceKey,
    ) -> EntryIndex {
        self.entries.allocate(owner, mode, key, &self.counters)
    }

    pub(crate) fn release_client_entry(&mut self, entry: EntryIndex) -> Result<()> {
        self.entries.retire(entry)
    }

    /// Binds `entry` to `lock` and runs the acquire transition.
    pub(crate) fn acquire(
        &mut self,
        lock: LockIndex,
        entry: EntryIndex,
        mode: AcquireMode,
    ) -> Result<AcquireOutcome> {
        self.entries[entry].lock = Some(lock);
        self.counters.record_acquire(self.entries[entry].mode);
        self.locks[lock].acquire(&mut self.entries, mode, entry)
    }

    /// Releases a held entry, evicts the lock if it went idle, and retires
    /// the entry.
    pub(crate) fn release_entry(&mut self, entry: EntryIndex) -> Result<()> {
        let (lock, key) = self.bound_lock(entry)?;
        self.counters.record_release(self.entries[entry].mode);
        let state = self.locks[lock].release(&mut self.entries, entry)?;
        self.settle(entry, key, state)
    }

    /// Tears down a failed wait (or a grant that raced with the failure),
    /// evicts the lock if it went idle, and retires the entry.
    pub(crate) fn abandon_entry(&mut self, entry: EntryIndex) -> Result<()> {
        let (lock, key) = self.bound_lock(entry)?;
        self.counters.record_error_cleanup();
        let state = self.locks[lock].error_cleanup(&mut self.entries, entry)?;
        self.settle(entry, key, state)
    }

    /// Drops an entry that was never linked into its lock.
    pub(crate) fn discard_entry(&mut self, entry: EntryIndex) -> Result<()> {
        let bound = self.entries[entry].lock.zip(self.entries[entry].resource);
        if let Some((lock, key)) = bound {
            if self.locks[lock].is_idle() {
                self.remove_lock(key)?;
            }
        }
        self.release_client_entry(entry)
    }

    fn bound_lock(&self, entry: EntryIndex) -> Result<(LockIndex, ResourceKey)> {
        let record: &ClientEntry = self.entries.get(entry).ok_or_else(|| {
            LockError::invariant(format!(
                "entry {entry:?} in partition {} is not live",
                self.index
            ))
        })?;
        record.lock.zip(record.resource).ok_or_else(|| {
            LockError::invariant(format!(
                "entry {entry:?} in partition {} is not bound to a lock",
                self.index
            ))
        })
    }

    fn settle(&mut self, entry: EntryIndex, key: ResourceKey, state: LockState) -> Result<()> {
        if state == LockState::Idle {
            self.remove_lock(key)?;
        }
        self.release_client_entry(entry)
    }

    /// Live locks with their keys.
    pub(crate) fn live_locks(&self) -> impl Iterator<Item = (ResourceKey, &Lock)> {
        self.locks
            .iter_live()
            .filter_map(|(_, lock)| lock.resource.map(|key| (key, lock)))
    }

    pub(crate) fn live_lock_count(&self) -> usize {
        self.maps.iter().map(FxHashMap::len).sum()
    }

    pub(crate) fn free_lock_count(&self) -> usize {
        self.locks.free_count()
    }
}

/// Routes resource ids to partitions.
pub(crate) struct Partitions {
    partitions: Box<[Mutex<Partition>]>,
    mask: usize,
}

impl Partitions {
    /// `count` must be a power of two.
    pub(crate) fn new(count: usize, resource_types: usize, counters: &Arc<LockCounters>) -> Self {
        debug_assert!(count.is_power_of_two());
        let partitions = (0..count)
            .map(|index| Mutex::new(Partition::new(index, resource_types, Arc::clone(counters))))
            .collect();
        Self {
            partitions,
            mask: count - 1,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.partitions.len()
    }

    /// Partition number owning `resource_id`.
    #[allow(clippy::cast_possible_truncation)] // Reason: folded to 32 bits before masking
    #[inline]
    pub(crate) fn index_for(&self, resource_id: u64) -> usize {
        let folded = (resource_id ^ (resource_id >> 32)) as u32;
        folded as usize & self.mask
    }

    pub(crate) fn lock(&self, index: usize) -> MutexGuard<'_, Partition> {
        self.partitions[index].lock()
    }

    #[cfg(test)]
    pub(crate) fn try_lock(&self, index: usize) -> Option<MutexGuard<'_, Partition>> {
        self.partitions[index].try_lock()
    }

    /// Stops the world: takes every partition mutex in index order.
    pub(crate) fn pause_world(&self) -> WorldPause<'_> {
        WorldPause {
            guards: self.partitions.iter().map(Mutex::lock).collect(),
        }
    }
}

/// Every partition mutex, held together.
///
/// Dropping the pause releases all partitions.
pub(crate) struct WorldPause<'a> {
    guards: Vec<MutexGuard<'a, Partition>>,
}

impl WorldPause<'_> {
    pub(crate) fn partition(&self, index: usize) -> &Partition {
        &self.guards[index]
    }

    pub(crate) fn partition_mut(&mut self, index: usize) -> &mut Partition {
        &mut self.guards[index]
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Partition> {
        self.guards.iter().map(|guard| &**guard)
    }
}
