//! Lock clients: the per-transaction handle used to take and release locks.
//!
//! A [`Client`] is owned by one thread. Each request first consults the
//! client-local index; only a miss reaches the partition owning the
//! resource. A request that must wait parks the client's thread on its own
//! latch, which the granting client releases directly.
//!
//! # Wait loop
//!
//! While waiting, the client wakes every `deadlock_check_interval`. On a
//! timeout it pauses the world and runs deadlock detection from itself; if
//! it closes a cycle it tears down its own wait entry (never its held locks)
//! and returns [`LockError::Deadlock`].

mod local;
mod state;


pub use local::ActiveLock;
pub use state::ClientId;

pub(crate) use local::ClientLocalLocks;
pub(crate) use state::ClientState;

use std::fmt;
use std::sync::Arc;

use crate::error::{LockError, Result};
use crate::manager::LockTable;
use crate::mode::{AcquireMode, LockMode};
use crate::resource::{ResourceKey, ResourceType};
use crate::table::{AcquireOutcome, EntryHandle};

/// Stops a client from another thread.
///
/// Stopping aborts an in-progress wait with [`LockError::Stopped`] and makes
/// every later acquire fail. Locks already held stay held until released or
/// until the client is closed.
#[derive(Clone)]
pub struct StopHandle {
    state: Arc<ClientState>,
}

impl StopHandle {
    /// Stops the client.
    pub fn stop(&self) {
        self.state.stop();
    }

    /// Returns `true` once the client was stopped.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.state.is_stopped()
    }
}

impl fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopHandle")
            .field("client", &self.state.id())
            .finish_non_exhaustive()
    }
}

/// A lock client.
///
/// Dropping a client releases every lock it holds.
pub struct Client {
    state: Arc<ClientState>,
    local: ClientLocalLocks,
    table: Arc<LockTable>,
    closed: bool,
}

impl Client {
    pub(crate) fn new(table: Arc<LockTable>, name: Option<String>) -> Self {
        let id = table.registry.allocate_id();
        let name = name.unwrap_or_else(|| id.to_string());
        let state = Arc::new(ClientState::new(id, name));
        table.registry.register(&state);
        tracing::trace!(client = %state.name(), "client created");
        Self {
            local: ClientLocalLocks::new(table.resource_types),
            state,
            table,
            closed: false,
        }
    }

    /// Client id.
    #[must_use]
    pub fn id(&self) -> ClientId {
        self.state.id()
    }

    /// Client name, as used in deadlock descriptions.
    #[must_use]
    pub fn name(&self) -> &str {
        self.state.name()
    }

    /// Acquires shared locks on `ids`, in order, waiting as needed.
    pub fn acquire_shared(&mut self, resource_type: ResourceType, ids: &[u64]) -> Result<()> {
        for &id in ids {
            self.acquire(AcquireMode::Blocking, LockMode::Shared, resource_type, id)?;
        }
        Ok(())
    }

    /// Acquires exclusive locks on `ids`, in order, waiting as needed.
    pub fn acquire_exclusive(&mut self, resource_type: ResourceType, ids: &[u64]) -> Result<()> {
        for &id in ids {
            self.acquire(AcquireMode::Blocking, LockMode::Exclusive, resource_type, id)?;
        }
        Ok(())
    }

    /// Tries to take a shared lock without waiting.
    ///
    /// `Ok(false)` means the lock is held incompatibly by someone else.
    pub fn try_shared(&mut self, resource_type: ResourceType, id: u64) -> Result<bool> {
        self.acquire(AcquireMode::NonBlocking, LockMode::Shared, resource_type, id)
    }

    /// Tries to take an exclusive lock without waiting.
    ///
    /// `Ok(false)` means the lock is held by someone else.
    pub fn try_exclusive(&mut self, resource_type: ResourceType, id: u64) -> Result<bool> {
        self.acquire(AcquireMode::NonBlocking, LockMode::Exclusive, resource_type, id)
    }

    /// Releases one shared hold on each of `ids`.
    pub fn release_shared(&mut self, resource_type: ResourceType, ids: &[u64]) -> Result<()> {
        for &id in ids {
            self.release(LockMode::Shared, resource_type, id)?;
        }
        Ok(())
    }

    /// Releases one exclusive hold on each of `ids`.
    pub fn release_exclusive(&mut self, resource_type: ResourceType, ids: &[u64]) -> Result<()> {
        for &id in ids {
            self.release(LockMode::Exclusive, resource_type, id)?;
        }
        Ok(())
    }

    /// Locks currently held, one row per global hold.
    #[must_use]
    pub fn active_locks(&self) -> Vec<ActiveLock> {
        self.local.active_locks()
    }

    /// Number of distinct resources currently locked.
    #[must_use]
    pub fn active_lock_count(&self) -> usize {
        self.local.active_lock_count()
    }

    /// Reentrant hold count for `id` in a mode satisfying `mode`.
    #[must_use]
    pub fn hold_count(&self, resource_type: ResourceType, id: u64, mode: LockMode) -> u32 {
        self.local.hold_count(ResourceKey::new(resource_type, id), mode)
    }

    /// Handle that can stop this client from another thread.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            state: Arc::clone(&self.state),
        }
    }

    /// Stops this client; see [`StopHandle`].
    pub fn stop(&self) {
        self.state.stop();
    }

    /// Releases every held lock and unregisters the client.
    ///
    /// Holds are released one partition at a time. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        match self.release_all() {
            Some(err) => Err(self.table.escalate(err)),
            None => Ok(()),
        }
    }

    fn release_all(&mut self) -> Option<LockError> {
        if self.closed {
            return None;
        }
        self.closed = true;

        let grouped = self.local.drain_grouped(self.table.partitions.len());
        let mut first_error = None;
        for (index, handles) in grouped.into_iter().enumerate() {
            if handles.is_empty() {
                continue;
            }
            let mut partition = self.table.partitions.lock(index);
            for handle in handles {
                if let Err(err) = partition.release_entry(handle.index) {
                    first_error.get_or_insert(err);
                }
            }
        }

        self.table.registry.unregister(self.state.id());
        tracing::trace!(client = %self.state.name(), "client closed");
        first_error
    }

    fn ensure_open(&self, resource_type: ResourceType) -> Result<()> {
        if self.closed {
            return Err(LockError::Closed);
        }
        self.table.check_resource_type(resource_type)
    }

    fn acquire(
        &mut self,
        acquire_mode: AcquireMode,
        requested: LockMode,
        resource_type: ResourceType,
        id: u64,
    ) -> Result<bool> {
        self.ensure_open(resource_type)?;
        if self.state.is_stopped() {
            self.state.latch().drain();
            return Err(LockError::Stopped);
        }

        let key = ResourceKey::new(resource_type, id);
        let Some(mode) = self.local.try_local_acquire(key, requested) else {
            return Ok(true);
        };

        let partition_index = self.table.partitions.index_for(id);
        let (entry, outcome) = {
            let mut partition = self.table.partitions.lock(partition_index);
            let entry = partition.new_client_entry(Arc::clone(&self.state), mode, key);
            let lock = partition.get_or_create_lock(key);
            match partition.acquire(lock, entry, acquire_mode) {
                Ok(AcquireOutcome::NotAcquired) => {
                    partition.discard_entry(entry).map_err(|err| self.table.escalate(err))?;
                    return Ok(false);
                }
                Ok(outcome) => (entry, outcome),
                // Checks run before any link is made, so the entry is free-standing.
                Err(err) => return Err(self.table.reject_entry(&mut partition, entry, err)),
            }
        };

        let handle = EntryHandle::new(partition_index, entry);
        if outcome == AcquireOutcome::MustWait {
            self.wait_for_grant(key, mode, handle)?;
        }
        self.local.globally_acquired(key, mode, handle);
        Ok(true)
    }

    fn wait_for_grant(&mut self, key: ResourceKey, mode: LockMode, handle: EntryHandle) -> Result<()> {
        self.table.counters.record_wait();
        tracing::debug!(client = %self.state.name(), resource = %key, %mode, "waiting for lock");

        loop {
            let woken = self.state.latch().try_acquire(self.table.check_interval);
            if self.state.is_stopped() {
                return Err(self.abort_wait(handle, LockError::Stopped));
            }
            if woken {
                if !self.state.is_waiting() {
                    tracing::debug!(client = %self.state.name(), resource = %key, "lock granted");
                    return Ok(());
                }
                tracing::debug!(client = %self.state.name(), "woken without a grant");
                continue;
            }
            self.check_for_deadlock(key, handle)?;
        }
    }

    /// Runs deadlock detection under a world pause. A cycle aborts this
    /// client's wait.
    fn check_for_deadlock(&mut self, key: ResourceKey, handle: EntryHandle) -> Result<()> {
        let mut world = self.table.partitions.pause_world();
        self.table.counters.record_detection_pass();
        tracing::debug!(client = %self.state.name(), resource = %key, "running deadlock detection");

        let error = match self.table.detector.detect(&world, &self.state) {
            Ok(None) => return Ok(()),
            Ok(Some(description)) => {
                self.table.counters.record_deadlock();
                tracing::warn!(client = %self.state.name(), %description, "deadlock detected, aborting wait");
                LockError::Deadlock(description)
            }
            Err(err) => err,
        };

        let cleanup = world.partition_mut(handle.partition).abandon_entry(handle.index);
        drop(world);
        self.state.latch().drain();
        if let Err(cleanup_err) = cleanup {
            return Err(self.table.escalate(cleanup_err));
        }
        Err(self.table.escalate(error))
    }

    /// Tears down the entry this client is waiting on and returns `error`.
    fn abort_wait(&self, handle: EntryHandle, error: LockError) -> LockError {
        let cleanup = self
            .table
            .partitions
            .lock(handle.partition)
            .abandon_entry(handle.index);
        self.state.latch().drain();
        match cleanup {
            Ok(()) => error,
            Err(cleanup_err) => self.table.escalate(cleanup_err),
        }
    }

    fn release(&mut self, requested: LockMode, resource_type: ResourceType, id: u64) -> Result<()> {
        self.ensure_open(resource_type)?;
        let key = ResourceKey::new(resource_type, id);
        let released = self
            .local
            .try_local_release(requested, key)
            .map_err(|err| self.table.escalate(err))?;
        let Some(hold) = released else {
            return Ok(());
        };

        let mut partition = self.table.partitions.lock(hold.handle.partition);
        partition
            .release_entry(hold.handle.index)
            .map_err(|err| self.table.escalate(err))
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(err) = self.release_all() {
            tracing::error!(client = %self.state.name(), error = %err, "failed to release locks on drop");
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.state.id())
            .field("name", &self.state.name())
            .field("active_locks", &self.local.active_lock_count())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}
