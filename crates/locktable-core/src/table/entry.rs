//! Client entries: one client's relationship (held or wanted) to one lock.

use std::ops::{Index, IndexMut};
use std::sync::Arc;

use crate::client::ClientState;
use crate::counters::LockCounters;
use crate::error::{LockError, Result};
use crate::mode::LockMode;
use crate::pool::{Pool, PoolIndex};
use crate::resource::ResourceKey;
use crate::table::lock::LockIndex;

/// Index of a [`ClientEntry`] inside its partition.
pub(crate) type EntryIndex = PoolIndex<ClientEntry>;

const PARTITION_SHIFT: u32 = 48;
const INDEX_MASK: u64 = (1 << PARTITION_SHIFT) - 1;

/// Partition-qualified entry address.
///
/// Handles cross partition boundaries (a client's wait marker, its local
/// index), so they carry the partition number next to the slot index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct EntryHandle {
    pub(crate) partition: usize,
    pub(crate) index: EntryIndex,
}

impl EntryHandle {
    pub(crate) const fn new(partition: usize, index: EntryIndex) -> Self {
        Self { partition, index }
    }

    /// Packs the handle into a `u64` for atomic storage.
    #[must_use]
    pub(crate) fn encode(self) -> u64 {
        ((self.partition as u64) << PARTITION_SHIFT) | (self.index.as_usize() as u64 & INDEX_MASK)
    }

    #[allow(clippy::cast_possible_truncation)] // Reason: both fields were usize values on encode
    #[must_use]
    pub(crate) fn decode(raw: u64) -> Self {
        Self {
            partition: (raw >> PARTITION_SHIFT) as usize,
            index: EntryIndex::from_raw((raw & INDEX_MASK) as usize),
        }
    }
}

/// One client's claim on one lock.
///
/// An entry sits on exactly one of: the lock's exclusive-holder slot, its
/// shared-holder list, its wait list, or the partition free list.
#[derive(Debug, Default)]
pub(crate) struct ClientEntry {
    pub(crate) owner: Option<Arc<ClientState>>,
    pub(crate) mode: LockMode,
    pub(crate) resource: Option<ResourceKey>,
    pub(crate) lock: Option<LockIndex>,
    pub(crate) next: Option<EntryIndex>,
}

/// Entry pool of a single partition.
pub(crate) struct EntryTable {
    partition: usize,
    pool: Pool<ClientEntry>,
}

impl EntryTable {
    pub(crate) fn new(partition: usize) -> Self {
        Self {
            partition,
            pool: Pool::default(),
        }
    }

    pub(crate) fn handle(&self, index: EntryIndex) -> EntryHandle {
        EntryHandle::new(self.partition, index)
    }

    /// Allocates an entry for `owner` from the free list or fresh.
    pub(crate) fn allocate(
        &mut self,
        owner: Arc<ClientState>,
        mode: LockMode,
        resource: ResourceKey,
        counters: &LockCounters,
    ) -> EntryIndex {
        let (index, recycled) = self.pool.allocate();
        if recycled {
            counters.record_entry_recycled();
            tracing::trace!(partition = self.partition, ?index, "recycled client entry");
        }
        let entry = &mut self.pool[index];
        entry.owner = Some(owner);
        entry.mode = mode;
        entry.resource = Some(resource);
        index
    }

    /// Clears the entry and returns it to the free list.
    pub(crate) fn retire(&mut self, index: EntryIndex) -> Result<()> {
        if self.pool.deallocate(index) {
            Ok(())
        } else {
            Err(LockError::invariant(format!(
                "retiring client entry {index:?} in partition {} that is not live",
                self.partition
            )))
        }
    }

    pub(crate) fn get(&self, index: EntryIndex) -> Option<&ClientEntry> {
        self.pool.get(index)
    }

    /// Owner of a linked entry.
    pub(crate) fn owner(&self, index: EntryIndex) -> Result<&Arc<ClientState>> {
        self.pool
            .get(index)
            .and_then(|entry| entry.owner.as_ref())
            .ok_or_else(|| {
                LockError::invariant(format!(
                    "entry {index:?} in partition {} is linked but has no owner",
                    self.partition
                ))
            })
    }

    /// Walks a singly linked entry list starting at `head`.
    pub(crate) fn chain(&self, head: Option<EntryIndex>) -> Chain<'_> {
        Chain {
            entries: self,
            cursor: head,
        }
    }

    pub(crate) fn live_count(&self) -> usize {
        self.pool.allocated_count()
    }

    pub(crate) fn free_count(&self) -> usize {
        self.pool.free_count()
    }
}

impl Index<EntryIndex> for EntryTable {
    type Output = ClientEntry;

    fn index(&self, index: EntryIndex) -> &ClientEntry {
        &self.pool[index]
    }
}

impl IndexMut<EntryIndex> for EntryTable {
    fn index_mut(&mut self, index: EntryIndex) -> &mut ClientEntry {
        &mut self.pool[index]
    }
}

/// Iterator over a linked entry list.
pub(crate) struct Chain<'a> {
    entries: &'a EntryTable,
    cursor: Option<EntryIndex>,
}

impl Iterator for Chain<'_> {
    type Item = EntryIndex;

    fn next(&mut self) -> Option<EntryIndex> {
        let current = self.cursor?;
        self.cursor = self.entries[current].next;
        Some(current)
    }
}
