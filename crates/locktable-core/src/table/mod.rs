//! Global lock state: locks, client entries and the partitions that own them.
//!
//! Everything in this module is mutated only under a partition mutex.

pub(crate) mod entry;
pub(crate) mod lock;
pub(crate) mod partition;

#[cfg(test)]
mod lock_tests;

pub(crate) use entry::{EntryHandle, EntryIndex, EntryTable};
pub(crate) use lock::{AcquireOutcome, Lock};
pub(crate) use partition::{Partition, Partitions, WorldPause};
