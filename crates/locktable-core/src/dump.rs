//! Diagnostic snapshot of the lock graph.

use serde::Serialize;

use crate::client::{ClientId, ClientState};
use crate::mode::LockMode;
use crate::registry::ClientRegistry;
use crate::resource::ResourceKey;
use crate::table::{EntryIndex, EntryTable, Lock, WorldPause};

/// Lock table snapshot for operator troubleshooting.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LockTableDump {
    /// Every live lock, ordered by partition then resource.
    pub locks: Vec<LockDump>,
    /// Every registered client.
    pub clients: Vec<ClientDump>,
    /// Pool occupancy per partition.
    pub partitions: Vec<PartitionStats>,
}

/// Pool occupancy of one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PartitionStats {
    /// Partition number.
    pub partition: usize,
    /// Locks with holders or waiters.
    pub live_locks: usize,
    /// Retired locks on the free list.
    pub free_locks: usize,
    /// Client entries in use.
    pub live_entries: usize,
    /// Retired client entries on the free list.
    pub free_entries: usize,
}

/// One live lock.
#[derive(Debug, Clone, Serialize)]
pub struct LockDump {
    /// Owning partition.
    pub partition: usize,
    /// Locked resource.
    pub resource: ResourceKey,
    /// Exclusive (or upgraded) holder.
    pub exclusive_holder: Option<HolderDump>,
    /// Shared holders, most recent first.
    pub shared_holders: Vec<HolderDump>,
    /// Waiters, in grant order.
    pub waiters: Vec<HolderDump>,
}

/// A client entry on a lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HolderDump {
    /// Client name.
    pub client: String,
    /// Entry mode.
    pub mode: LockMode,
}

/// One registered client.
#[derive(Debug, Clone, Serialize)]
pub struct ClientDump {
    /// Client id.
    pub id: ClientId,
    /// Client name.
    pub name: String,
    /// Resource and mode the client is waiting for.
    pub waiting_for: Option<(ResourceKey, LockMode)>,
    /// Whether the client was stopped.
    pub stopped: bool,
}

impl LockTableDump {
    pub(crate) fn capture(world: &WorldPause<'_>, registry: &ClientRegistry) -> Self {
        let mut locks: Vec<LockDump> = world
            .iter()
            .flat_map(|partition| {
                partition
                    .live_locks()
                    .map(move |(resource, lock)| dump_lock(partition.index(), resource, lock, &partition.entries))
            })
            .collect();
        locks.sort_by_key(|lock| {
            (
                lock.partition,
                lock.resource.resource_type.id(),
                lock.resource.resource_id,
            )
        });

        let clients = registry
            .live_clients()
            .iter()
            .map(|client| dump_client(world, client))
            .collect();

        let partitions = world
            .iter()
            .map(|partition| PartitionStats {
                partition: partition.index(),
                live_locks: partition.live_lock_count(),
                free_locks: partition.free_lock_count(),
                live_entries: partition.entries.live_count(),
                free_entries: partition.entries.free_count(),
            })
            .collect();

        Self {
            locks,
            clients,
            partitions,
        }
    }

    /// Renders the dump as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Client entries in use across all partitions.
    #[must_use]
    pub fn live_entry_count(&self) -> usize {
        self.partitions.iter().map(|stats| stats.live_entries).sum()
    }

    /// Finds the dump of the lock on `resource`.
    #[must_use]
    pub fn lock(&self, resource: ResourceKey) -> Option<&LockDump> {
        self.locks.iter().find(|lock| lock.resource == resource)
    }
}

fn dump_lock(partition: usize, resource: ResourceKey, lock: &Lock, entries: &EntryTable) -> LockDump {
    let holder = |index: EntryIndex| {
        let entry = &entries[index];
        HolderDump {
            client: entry
                .owner
                .as_ref()
                .map_or_else(|| "<retired>".to_string(), |owner| owner.name().to_string()),
            mode: entry.mode,
        }
    };
    LockDump {
        partition,
        resource,
        exclusive_holder: lock.exclusive_holder.map(&holder),
        shared_holders: lock.shared_holder_list(entries).into_iter().map(&holder).collect(),
        waiters: lock.waiter_list(entries).into_iter().map(&holder).collect(),
    }
}

fn dump_client(world: &WorldPause<'_>, client: &ClientState) -> ClientDump {
    let waiting_for = client.waits_for().and_then(|handle| {
        let entry = world.partition(handle.partition).entries.get(handle.index)?;
        entry.resource.map(|resource| (resource, entry.mode))
    });
    ClientDump {
        id: client.id(),
        name: client.name().to_string(),
        waiting_for,
        stopped: client.is_stopped(),
    }
}
