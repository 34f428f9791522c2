//! Client-local lock index: reentrancy counting and upgrade folding.
//!
//! Repeat or compatible requests are answered here without touching any
//! partition. Only the first hold of a `(resource, mode)` pair and the
//! release of its last reentrant hold reach the global lock table.

use rustc_hash::FxHashMap;
use serde::Serialize;
use smallvec::SmallVec;

use crate::error::{LockError, Result};
use crate::mode::LockMode;
use crate::resource::{ResourceKey, ResourceType};
use crate::table::EntryHandle;

/// A lock currently held by a client, as reported for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActiveLock {
    /// Resource class.
    pub resource_type: ResourceType,
    /// Resource id.
    pub resource_id: u64,
    /// Mode as held in the global table.
    pub mode: LockMode,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct LocalHold {
    pub(crate) mode: LockMode,
    pub(crate) reentrancy: u32,
    pub(crate) handle: EntryHandle,
}

/// Holds on one resource; at most one per global mode.
type HoldChain = SmallVec<[LocalHold; 2]>;

/// Per-client index of held entries.
pub(crate) struct ClientLocalLocks {
    by_type: Vec<FxHashMap<u64, (ResourceType, HoldChain)>>,
}

impl ClientLocalLocks {
    pub(crate) fn new(resource_types: usize) -> Self {
        Self {
            by_type: (0..resource_types).map(|_| FxHashMap::default()).collect(),
        }
    }

    fn chain(&self, key: ResourceKey) -> Option<&HoldChain> {
        self.by_type[key.resource_type.id() as usize]
            .get(&key.resource_id)
            .map(|(_, chain)| chain)
    }

    /// Resolves `requested` locally if possible.
    ///
    /// Returns `None` when an existing hold absorbed the request, otherwise
    /// the mode to acquire globally (`Upgrade` when a shared hold exists and
    /// exclusive was requested).
    pub(crate) fn try_local_acquire(
        &mut self,
        key: ResourceKey,
        requested: LockMode,
    ) -> Option<LockMode> {
        let map = &mut self.by_type[key.resource_type.id() as usize];
        let Some((_, chain)) = map.get_mut(&key.resource_id) else {
            return Some(requested);
        };

        if let Some(hold) = chain.iter_mut().find(|hold| hold.mode.covers(requested)) {
            hold.reentrancy += 1;
            return None;
        }

        let holds_shared = chain.iter().any(|hold| hold.mode == LockMode::Shared);
        if requested == LockMode::Exclusive && holds_shared {
            Some(LockMode::Upgrade)
        } else {
            Some(requested)
        }
    }

    /// Records a hold granted by the global table.
    pub(crate) fn globally_acquired(&mut self, key: ResourceKey, mode: LockMode, handle: EntryHandle) {
        let (_, chain) = self.by_type[key.resource_type.id() as usize]
            .entry(key.resource_id)
            .or_insert_with(|| (key.resource_type, HoldChain::new()));
        chain.push(LocalHold {
            mode,
            reentrancy: 1,
            handle,
        });
    }

    /// Drops one reentrant hold.
    ///
    /// Returns the hold when its count reached zero; the caller must then
    /// release it globally exactly once.
    pub(crate) fn try_local_release(
        &mut self,
        requested: LockMode,
        key: ResourceKey,
    ) -> Result<Option<LocalHold>> {
        let map = &mut self.by_type[key.resource_type.id() as usize];
        let Some((_, chain)) = map.get_mut(&key.resource_id) else {
            return Err(LockError::invariant(format!(
                "releasing {requested} lock on {key} that is not held"
            )));
        };
        let Some(position) = chain.iter().position(|hold| hold.mode.covers(requested)) else {
            return Err(LockError::invariant(format!(
                "releasing {requested} lock on {key} that is not held in that mode"
            )));
        };

        let hold = &mut chain[position];
        hold.reentrancy -= 1;
        if hold.reentrancy > 0 {
            return Ok(None);
        }

        let released = chain.remove(position);
        if chain.is_empty() {
            map.remove(&key.resource_id);
        }
        Ok(Some(released))
    }

    /// Removes every hold, grouped by partition index.
    pub(crate) fn drain_grouped(&mut self, partitions: usize) -> Vec<Vec<EntryHandle>> {
        let mut grouped = vec![Vec::new(); partitions];
        for map in &mut self.by_type {
            for (_, (_, chain)) in map.drain() {
                for hold in chain {
                    grouped[hold.handle.partition].push(hold.handle);
                }
            }
        }
        grouped
    }

    pub(crate) fn active_locks(&self) -> Vec<ActiveLock> {
        self.by_type
            .iter()
            .flat_map(|map| map.iter())
            .flat_map(|(&resource_id, (resource_type, chain))| {
                chain.iter().map(move |hold| ActiveLock {
                    resource_type: *resource_type,
                    resource_id,
                    mode: hold.mode,
                })
            })
            .collect()
    }

    /// Number of distinct held resources.
    pub(crate) fn active_lock_count(&self) -> usize {
        self.by_type.iter().map(FxHashMap::len).sum()
    }

    /// Reentrancy count of the hold that satisfies `mode`, or 0.
    pub(crate) fn hold_count(&self, key: ResourceKey, mode: LockMode) -> u32 {
        self.chain(key)
            .and_then(|chain| chain.iter().find(|hold| hold.mode.covers(mode)))
            .map_or(0, |hold| hold.reentrancy)
    }
}
