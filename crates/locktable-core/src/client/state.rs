//! Client state shared between the owning thread and the lock table.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;

use crate::latch::SingleWaiterLatch;
use crate::table::EntryHandle;

const NOT_WAITING: u64 = u64::MAX;

/// Unique id of a client within its lock manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ClientId(pub(crate) u64);

impl ClientId {
    /// Returns the raw id.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Per-client state reachable from lock entries.
///
/// `waits_for` is written only under the mutex of the partition that owns
/// the awaited entry (set when the entry is queued, cleared when it is
/// granted or cleaned up). The owning thread only reads it.
#[derive(Debug)]
pub(crate) struct ClientState {
    id: ClientId,
    name: String,
    latch: SingleWaiterLatch,
    waits_for: AtomicU64,
    stopped: AtomicBool,
}

impl ClientState {
    pub(crate) fn new(id: ClientId, name: String) -> Self {
        Self {
            id,
            name,
            latch: SingleWaiterLatch::new(),
            waits_for: AtomicU64::new(NOT_WAITING),
            stopped: AtomicBool::new(false),
        }
    }

    pub(crate) const fn id(&self) -> ClientId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) const fn latch(&self) -> &SingleWaiterLatch {
        &self.latch
    }

    /// The entry this client is queued on, if any.
    pub(crate) fn waits_for(&self) -> Option<EntryHandle> {
        match self.waits_for.load(Ordering::Acquire) {
            NOT_WAITING => None,
            raw => Some(EntryHandle::decode(raw)),
        }
    }

    pub(crate) fn is_waiting(&self) -> bool {
        self.waits_for.load(Ordering::Acquire) != NOT_WAITING
    }

    pub(crate) fn set_waits_for(&self, handle: Option<EntryHandle>) {
        let raw = handle.map_or(NOT_WAITING, EntryHandle::encode);
        self.waits_for.store(raw, Ordering::Release);
    }

    /// Clears the wait marker and wakes the client.
    pub(crate) fn grant(&self) {
        self.set_waits_for(None);
        self.latch.release();
    }

    pub(crate) fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.latch.release();
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}
