//! Per-resource lock state machine.
//!
//! A [`Lock`] is `IDLE`, `SHARED(n)` or `EXCLUSIVE`, with any number of
//! waiters attached. All transitions run under the owning partition's mutex,
//! with that partition's [`EntryTable`] passed in so list links can be
//! followed and rewritten.
//!
//! # Wait list ordering
//!
//! FIFO, with one exception: an `Upgrade` request is queued ahead of the
//! first plain `Exclusive` waiter. Otherwise the exclusive waiter would block
//! the upgrade while the upgrader's own shared hold blocks the exclusive
//! waiter.

use crate::error::{LockError, Result};
use crate::mode::{AcquireMode, LockMode};
use crate::pool::PoolIndex;
use crate::resource::ResourceKey;
use crate::table::entry::{EntryIndex, EntryTable};

/// Index of a [`Lock`] inside its partition.
pub(crate) type LockIndex = PoolIndex<Lock>;

/// Result of [`Lock::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AcquireOutcome {
    /// The entry now holds the lock.
    Acquired,
    /// Non-blocking request could not be granted; the entry was not queued.
    NotAcquired,
    /// The entry was queued and its owner's wait marker set.
    MustWait,
}

/// Lock occupancy after a release or cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LockState {
    /// No holders and no waiters; the lock must be evicted.
    Idle,
    /// Still held or waited on.
    Held,
}

/// Holder and waiter lists of one resource.
#[derive(Debug, Default)]
pub(crate) struct Lock {
    pub(crate) resource: Option<ResourceKey>,
    pub(crate) exclusive_holder: Option<EntryIndex>,
    pub(crate) shared_holders: Option<EntryIndex>,
    pub(crate) wait_list: Option<EntryIndex>,
}

impl Lock {
    /// Returns `true` when nothing holds or waits on this lock.
    #[must_use]
    pub(crate) const fn is_idle(&self) -> bool {
        self.exclusive_holder.is_none() && self.shared_holders.is_none() && self.wait_list.is_none()
    }

    fn state(&self) -> LockState {
        if self.is_idle() {
            LockState::Idle
        } else {
            LockState::Held
        }
    }

    /// Tries to grant `entry`, queueing it if `mode` allows waiting.
    pub(crate) fn acquire(
        &mut self,
        entries: &mut EntryTable,
        mode: AcquireMode,
        entry: EntryIndex,
    ) -> Result<AcquireOutcome> {
        if entries.owner(entry)?.is_waiting() {
            return Err(LockError::invariant(format!(
                "client {} requested a lock while already waiting",
                entries.owner(entry)?.name()
            )));
        }

        match entries[entry].mode {
            LockMode::Shared => self.acquire_shared(entries, mode, entry),
            LockMode::Exclusive => {
                if self.exclusive_holder.is_some() || self.shared_holders.is_some() {
                    return self.acquire_failed(entries, mode, entry);
                }
                self.exclusive_holder = Some(entry);
                Ok(AcquireOutcome::Acquired)
            }
            LockMode::Upgrade => self.acquire_upgrade(entries, mode, entry),
        }
    }

    fn acquire_shared(
        &mut self,
        entries: &mut EntryTable,
        mode: AcquireMode,
        entry: EntryIndex,
    ) -> Result<AcquireOutcome> {
        if let Some(holder) = self.exclusive_holder {
            // The exclusive holder may take a shared hold on its own lock.
            if entries.owner(holder)?.id() != entries.owner(entry)?.id() {
                return self.acquire_failed(entries, mode, entry);
            }
        }
        entries[entry].next = self.shared_holders;
        self.shared_holders = Some(entry);
        Ok(AcquireOutcome::Acquired)
    }

    fn acquire_upgrade(
        &mut self,
        entries: &mut EntryTable,
        mode: AcquireMode,
        entry: EntryIndex,
    ) -> Result<AcquireOutcome> {
        if self.exclusive_holder.is_some() {
            return Err(LockError::invariant(
                "upgrade requested on an exclusively held lock",
            ));
        }
        let Some(head) = self.shared_holders else {
            return Err(LockError::invariant(
                "upgrade requested without a shared hold",
            ));
        };
        if entries[head].next.is_some() {
            return self.acquire_failed(entries, mode, entry);
        }
        if entries.owner(head)?.id() != entries.owner(entry)?.id() {
            return Err(LockError::invariant(format!(
                "upgrade requested by {} while {} is the sole shared holder",
                entries.owner(entry)?.name(),
                entries.owner(head)?.name()
            )));
        }
        self.exclusive_holder = Some(entry);
        Ok(AcquireOutcome::Acquired)
    }

    fn acquire_failed(
        &mut self,
        entries: &mut EntryTable,
        mode: AcquireMode,
        entry: EntryIndex,
    ) -> Result<AcquireOutcome> {
        if mode == AcquireMode::NonBlocking {
            return Ok(AcquireOutcome::NotAcquired);
        }

        let is_upgrade = entries[entry].mode == LockMode::Upgrade;
        let mut previous = None;
        let mut cursor = self.wait_list;
        while let Some(current) = cursor {
            if is_upgrade && entries[current].mode == LockMode::Exclusive {
                break;
            }
            previous = Some(current);
            cursor = entries[current].next;
        }

        entries[entry].next = cursor;
        match previous {
            Some(previous) => entries[previous].next = Some(entry),
            None => self.wait_list = Some(entry),
        }

        let handle = entries.handle(entry);
        entries.owner(entry)?.set_waits_for(Some(handle));
        Ok(AcquireOutcome::MustWait)
    }

    /// Drops the hold of `entry` and grants waiters that became eligible.
    pub(crate) fn release(&mut self, entries: &mut EntryTable, entry: EntryIndex) -> Result<LockState> {
        match entries[entry].mode {
            LockMode::Exclusive | LockMode::Upgrade => {
                if self.exclusive_holder != Some(entry) {
                    return Err(LockError::invariant(format!(
                        "releasing {} hold of {} that is not the exclusive holder",
                        entries[entry].mode,
                        entries.owner(entry)?.name()
                    )));
                }
                self.exclusive_holder = None;
                self.grant_lock_to_waiters(entries)
            }
            LockMode::Shared => {
                if !self.unlink_shared(entries, entry) {
                    return Err(LockError::invariant(format!(
                        "releasing shared hold of {} that is not a shared holder",
                        entries.owner(entry)?.name()
                    )));
                }
                if self.exclusive_holder.is_none()
                    && (self.shared_holders.is_none() || self.can_grant_upgrade(entries)?)
                {
                    self.grant_lock_to_waiters(entries)
                } else {
                    Ok(self.state())
                }
            }
        }
    }

    /// Removes a failed waiter, or releases it if it was granted meanwhile.
    pub(crate) fn error_cleanup(
        &mut self,
        entries: &mut EntryTable,
        entry: EntryIndex,
    ) -> Result<LockState> {
        if self.is_holder(entries, entry) {
            entries.owner(entry)?.set_waits_for(None);
            return self.release(entries, entry);
        }

        if !self.unlink_waiter(entries, entry) {
            return Err(LockError::invariant(format!(
                "cleanup of {} entry for {}: neither holder nor waiter",
                entries[entry].mode,
                entries.owner(entry)?.name()
            )));
        }
        entries.owner(entry)?.set_waits_for(None);

        if self.exclusive_holder.is_none()
            && (self.shared_holders.is_none() || self.can_grant_upgrade(entries)?)
        {
            return self.grant_lock_to_waiters(entries);
        }
        Ok(self.state())
    }

    /// Grants waiters from the head of the wait list until one cannot be
    /// granted.
    pub(crate) fn grant_lock_to_waiters(&mut self, entries: &mut EntryTable) -> Result<LockState> {
        while let Some(next) = self.wait_list {
            if self.exclusive_holder.is_some() {
                break;
            }
            match entries[next].mode {
                LockMode::Shared => {
                    self.pop_waiter(entries, next);
                    entries[next].next = self.shared_holders;
                    self.shared_holders = Some(next);
                    entries.owner(next)?.grant();
                }
                LockMode::Exclusive => {
                    if self.shared_holders.is_some() {
                        break;
                    }
                    self.pop_waiter(entries, next);
                    self.exclusive_holder = Some(next);
                    entries.owner(next)?.grant();
                    break;
                }
                LockMode::Upgrade => {
                    match self.shared_holders {
                        Some(head) if entries[head].next.is_some() => break,
                        Some(head) if entries.owner(head)?.id() != entries.owner(next)?.id() => {
                            return Err(LockError::invariant(format!(
                                "upgrade waiter {} is not the remaining shared holder",
                                entries.owner(next)?.name()
                            )));
                        }
                        _ => {}
                    }
                    self.pop_waiter(entries, next);
                    self.exclusive_holder = Some(next);
                    entries.owner(next)?.grant();
                    break;
                }
            }
        }
        Ok(self.state())
    }

    /// `true` if the one remaining shared holder is waiting to upgrade.
    fn can_grant_upgrade(&self, entries: &EntryTable) -> Result<bool> {
        let (Some(head), Some(waiter)) = (self.shared_holders, self.wait_list) else {
            return Ok(false);
        };
        Ok(entries[head].next.is_none()
            && entries[waiter].mode == LockMode::Upgrade
            && entries.owner(head)?.id() == entries.owner(waiter)?.id())
    }

    fn pop_waiter(&mut self, entries: &mut EntryTable, head: EntryIndex) {
        self.wait_list = entries[head].next;
        entries[head].next = None;
    }

    fn is_holder(&self, entries: &EntryTable, entry: EntryIndex) -> bool {
        self.exclusive_holder == Some(entry)
            || entries.chain(self.shared_holders).any(|holder| holder == entry)
    }

    fn unlink_shared(&mut self, entries: &mut EntryTable, entry: EntryIndex) -> bool {
        let mut head = self.shared_holders;
        let found = unlink(entries, &mut head, entry);
        self.shared_holders = head;
        found
    }

    fn unlink_waiter(&mut self, entries: &mut EntryTable, entry: EntryIndex) -> bool {
        let mut head = self.wait_list;
        let found = unlink(entries, &mut head, entry);
        self.wait_list = head;
        found
    }

    /// Shared holders, most recent first.
    pub(crate) fn shared_holder_list(&self, entries: &EntryTable) -> Vec<EntryIndex> {
        entries.chain(self.shared_holders).collect()
    }

    /// Waiters, in grant order.
    pub(crate) fn waiter_list(&self, entries: &EntryTable) -> Vec<EntryIndex> {
        entries.chain(self.wait_list).collect()
    }
}

/// Removes `target` from the list starting at `head`.
fn unlink(entries: &mut EntryTable, head: &mut Option<EntryIndex>, target: EntryIndex) -> bool {
    let mut previous: Option<EntryIndex> = None;
    let mut cursor = *head;
    while let Some(current) = cursor {
        let next = entries[current].next;
        if current == target {
            match previous {
                Some(previous) => entries[previous].next = next,
                None => *head = next,
            }
            entries[current].next = None;
            return true;
        }
        previous = Some(current);
        cursor = next;
    }
    false
}
