//! Lock manager: owns the partitioned lock table and creates clients.

use std::sync::Arc;
use std::time::Duration;

use crate::client::Client;
use crate::config::LockManagerConfig;
use crate::counters::{CounterSnapshot, LockCounters};
use crate::deadlock::DeadlockDetector;
use crate::dump::LockTableDump;
use crate::error::{LockError, Result};
use crate::registry::ClientRegistry;
use crate::resource::ResourceType;
use crate::table::{EntryIndex, Partition, Partitions};

/// State shared by a manager and all of its clients.
pub(crate) struct LockTable {
    pub(crate) partitions: Partitions,
    pub(crate) counters: Arc<LockCounters>,
    pub(crate) registry: Arc<ClientRegistry>,
    pub(crate) detector: DeadlockDetector,
    pub(crate) check_interval: Duration,
    pub(crate) resource_types: usize,
    strict: bool,
}

impl LockTable {
    /// Reports an invariant violation: logs it, counts it, and panics in
    /// strict mode. Other errors pass through untouched.
    pub(crate) fn escalate(&self, err: LockError) -> LockError {
        if let LockError::InvariantViolation(message) = &err {
            self.counters.record_invariant_violation();
            tracing::error!(%message, "lock table invariant violated");
            assert!(!self.strict, "lock table invariant violated: {message}");
        }
        err
    }

    /// Discards the free-standing entry of a rejected acquire and escalates
    /// the rejection. A discard that fails as well is logged and counted.
    pub(crate) fn reject_entry(
        &self,
        partition: &mut Partition,
        entry: EntryIndex,
        err: LockError,
    ) -> LockError {
        if let Err(cleanup) = partition.discard_entry(entry) {
            self.counters.record_invariant_violation();
            tracing::error!(error = %cleanup, cause = %err, "failed to discard rejected lock entry");
        }
        self.escalate(err)
    }

    pub(crate) fn check_resource_type(&self, resource_type: ResourceType) -> Result<()> {
        if (resource_type.id() as usize) < self.resource_types {
            Ok(())
        } else {
            Err(LockError::UnknownResourceType {
                name: resource_type.name(),
                id: resource_type.id(),
                configured: self.resource_types,
            })
        }
    }
}

/// Partitioned lock manager.
///
/// # Example
///
/// ```rust
/// use locktable_core::{LockManager, LockManagerConfig, ResourceType};
///
/// const NODE: ResourceType = ResourceType::new(0, "Node");
///
/// let manager = LockManager::new(LockManagerConfig::default())?;
/// let mut client = manager.new_client_named("tx-1");
///
/// client.acquire_exclusive(NODE, &[42])?;
/// assert_eq!(client.active_lock_count(), 1);
/// client.release_exclusive(NODE, &[42])?;
/// client.close()?;
/// # Ok::<(), locktable_core::LockError>(())
/// ```
pub struct LockManager {
    table: Arc<LockTable>,
    config: LockManagerConfig,
}

impl LockManager {
    /// Creates a manager with its own client registry.
    pub fn new(config: LockManagerConfig) -> Result<Self> {
        Self::with_registry(config, Arc::new(ClientRegistry::new()))
    }

    /// Creates a manager that registers its clients in `registry`.
    pub fn with_registry(config: LockManagerConfig, registry: Arc<ClientRegistry>) -> Result<Self> {
        config.validate()?;
        let counters = Arc::new(LockCounters::new());
        let table = LockTable {
            partitions: Partitions::new(config.partitions, config.resource_types, &counters),
            counters,
            registry,
            detector: DeadlockDetector,
            check_interval: config.deadlock_check_interval(),
            resource_types: config.resource_types,
            strict: config.strict_invariants(),
        };
        tracing::debug!(
            partitions = config.partitions,
            resource_types = config.resource_types,
            strict = table.strict,
            "lock manager created"
        );
        Ok(Self {
            table: Arc::new(table),
            config,
        })
    }

    /// Creates a client named after its id.
    #[must_use]
    pub fn new_client(&self) -> Client {
        Client::new(Arc::clone(&self.table), None)
    }

    /// Creates a client with a display name.
    #[must_use]
    pub fn new_client_named(&self, name: impl Into<String>) -> Client {
        Client::new(Arc::clone(&self.table), Some(name.into()))
    }

    /// Effective configuration.
    #[must_use]
    pub fn config(&self) -> &LockManagerConfig {
        &self.config
    }

    /// Client registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.table.registry
    }

    /// Counter snapshot.
    #[must_use]
    pub fn counters(&self) -> CounterSnapshot {
        self.table.counters.snapshot()
    }

    /// Number of live (non-idle) locks across all partitions.
    ///
    /// Partitions are visited one at a time, so the total is not a snapshot
    /// under concurrent use.
    #[must_use]
    pub fn live_lock_count(&self) -> usize {
        (0..self.table.partitions.len())
            .map(|index| self.table.partitions.lock(index).live_lock_count())
            .sum()
    }

    /// Snapshot of every live lock and every client's wait target, taken
    /// under a world pause.
    #[must_use]
    pub fn dump(&self) -> LockTableDump {
        let world = self.table.partitions.pause_world();
        LockTableDump::capture(&world, &self.table.registry)
    }
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("config", &self.config)
            .field("clients", &self.table.registry.len())
            .finish_non_exhaustive()
    }
}
