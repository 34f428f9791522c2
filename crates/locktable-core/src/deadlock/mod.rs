//! Wait-for graph deadlock detection.
//!
//! The detector runs while the world is paused, so the graph it walks is
//! frozen. Starting from the client whose wait just timed out, it follows
//! "waits for lock, lock held by client" edges depth first. A path back to
//! the starting client is a deadlock, and the starting client is the one that
//! gets aborted.

mod description;


pub use description::{DeadlockDescription, DeadlockLink};

use rustc_hash::FxHashSet;

use crate::client::{ClientId, ClientState};
use crate::error::{LockError, Result};
use crate::mode::LockMode;
use crate::table::{EntryHandle, Lock, Partition, WorldPause};

/// Depth-first cycle search over the paused lock table.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct DeadlockDetector;

/// One blocked client on the current search path.
struct Frame<'w> {
    wait: EntryHandle,
    blockers: Vec<&'w ClientState>,
    next: usize,
}

impl DeadlockDetector {
    /// Looks for a wait-for cycle through `source`.
    ///
    /// Returns `Ok(None)` if `source` is not waiting or no cycle reaches it.
    /// The walk keeps its own stack, so wait chains of any length are
    /// followed to the end.
    #[allow(clippy::unused_self)]
    pub(crate) fn detect(
        &self,
        world: &WorldPause<'_>,
        source: &ClientState,
    ) -> Result<Option<DeadlockDescription>> {
        let Some(source_wait) = source.waits_for() else {
            return Ok(None);
        };

        let mut seen = FxHashSet::default();
        seen.insert(source.id());
        let mut path = vec![Frame {
            wait: source_wait,
            blockers: blockers(world, source, source_wait)?,
            next: 0,
        }];

        while let Some(frame) = path.last_mut() {
            let Some(&holder) = frame.blockers.get(frame.next) else {
                path.pop();
                continue;
            };
            frame.next += 1;

            if holder.id() == source.id() {
                let mut chain: Vec<EntryHandle> = path.iter().map(|frame| frame.wait).collect();
                chain.push(source_wait);
                if cfg!(debug_assertions) {
                    validate_chain(world, &chain)?;
                }
                return describe(world, &chain).map(Some);
            }

            let Some(wait) = holder.waits_for() else {
                continue;
            };
            if !seen.insert(holder.id()) {
                continue;
            }
            // Every frame is a distinct client, so the path never outgrows the visited set.
            if path.len() >= seen.len() {
                return Err(LockError::invariant(format!(
                    "deadlock search path of {} outgrew {} visited clients at {}",
                    path.len(),
                    seen.len(),
                    holder.name()
                )));
            }
            path.push(Frame {
                wait,
                blockers: blockers(world, holder, wait)?,
                next: 0,
            });
        }
        Ok(None)
    }
}

/// Clients that may be blocking `blockee` on the lock it waits for: the
/// exclusive holder, then every other shared holder when the request is
/// exclusive-class.
fn blockers<'w>(
    world: &'w WorldPause<'_>,
    blockee: &ClientState,
    waiting: EntryHandle,
) -> Result<Vec<&'w ClientState>> {
    let partition = world.partition(waiting.partition);
    let (lock, mode) = awaited_lock(partition, waiting)?;
    let mut found = Vec::new();

    if let Some(holder) = lock.exclusive_holder {
        let holder = partition.entries.owner(holder)?;
        if holder.id() == blockee.id() {
            return Err(LockError::invariant(format!(
                "{} waits on a lock it holds exclusively",
                blockee.name()
            )));
        }
        found.push(&**holder);
    }

    if mode.is_exclusive_class() {
        for shared in partition.entries.chain(lock.shared_holders) {
            let holder = partition.entries.owner(shared)?;
            // An upgrader is listed among the shared holders it waits on.
            if holder.id() != blockee.id() {
                found.push(&**holder);
            }
        }
    }
    Ok(found)
}

fn awaited_lock(
    partition: &Partition,
    waiting: EntryHandle,
) -> Result<(&Lock, LockMode)> {
    let entry = partition.entries.get(waiting.index).ok_or_else(|| {
        LockError::invariant(format!("wait marker {waiting:?} points at a retired entry"))
    })?;
    let lock = entry.lock.ok_or_else(|| {
        LockError::invariant(format!("wait marker {waiting:?} points at an unbound entry"))
    })?;
    Ok((partition.lock(lock), entry.mode))
}

/// Checks every link against the live graph: each waiter is on the wait list
/// of a lock held by the next link's client, and the chain is closed.
pub(crate) fn validate_chain(world: &WorldPause<'_>, chain: &[EntryHandle]) -> Result<()> {
    let (Some(first), Some(last)) = (chain.first(), chain.last()) else {
        return Err(LockError::invariant("empty deadlock chain"));
    };
    if chain.len() < 2 {
        return Err(LockError::invariant("deadlock chain with a single link"));
    }
    if owner_id(world, *first)? != owner_id(world, *last)? {
        return Err(LockError::invariant("deadlock chain is not closed"));
    }

    for pair in chain.windows(2) {
        let (waiter, next) = (pair[0], pair[1]);
        let partition = world.partition(waiter.partition);
        let (lock, _) = awaited_lock(partition, waiter)?;

        if !partition.entries.chain(lock.wait_list).any(|entry| entry == waiter.index) {
            return Err(LockError::invariant(format!(
                "deadlock link {waiter:?} is not on its lock's wait list"
            )));
        }

        let next_owner = owner_id(world, next)?;
        let held_by_next = lock
            .exclusive_holder
            .into_iter()
            .chain(partition.entries.chain(lock.shared_holders))
            .map(|holder| partition.entries.owner(holder).map(|owner| owner.id()))
            .collect::<Result<Vec<_>>>()?
            .contains(&next_owner);
        if !held_by_next {
            return Err(LockError::invariant(format!(
                "deadlock link {waiter:?} waits on a lock not held by {next_owner}"
            )));
        }
    }
    Ok(())
}

fn owner_id(world: &WorldPause<'_>, handle: EntryHandle) -> Result<ClientId> {
    world
        .partition(handle.partition)
        .entries
        .owner(handle.index)
        .map(|owner| owner.id())
}

fn describe(world: &WorldPause<'_>, chain: &[EntryHandle]) -> Result<DeadlockDescription> {
    let links = chain
        .iter()
        .map(|handle| {
            let partition = world.partition(handle.partition);
            let entry = partition.entries.get(handle.index).ok_or_else(|| {
                LockError::invariant(format!("deadlock link {handle:?} is retired"))
            })?;
            let owner = partition.entries.owner(handle.index)?;
            let resource = entry.resource.ok_or_else(|| {
                LockError::invariant(format!("deadlock link {handle:?} has no resource"))
            })?;
            Ok(DeadlockLink {
                client_id: owner.id(),
                client_name: owner.name().to_string(),
                mode: entry.mode,
                resource,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(DeadlockDescription::new(links))
}
