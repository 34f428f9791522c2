//! # locktable-core
//!
//! Partitioned, in-memory lock manager for a database transaction layer.
//!
//! Clients take shared or exclusive locks on resources named by a
//! `(resource type, resource id)` pair. The lock table is split into
//! independently locked partitions; blocked clients park on their own latch
//! and periodically run wait-for-graph deadlock detection.
//!
//! ## Features
//!
//! - **Shared/Exclusive/Upgrade**: an exclusive request on a resource the
//!   client already holds shared becomes an in-place upgrade
//! - **Reentrancy**: repeat requests are counted client-side and never touch
//!   the partition mutex
//! - **Deadlock detection**: the waiter that closes a cycle is aborted with a
//!   readable chain
//! - **Free lists**: locks and client entries are recycled per partition
//!
//! ## Quick Start
//!
//! ```rust
//! use locktable_core::{LockManager, LockManagerConfig, ResourceType};
//!
//! const NODE: ResourceType = ResourceType::new(0, "Node");
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = LockManager::new(LockManagerConfig::default())?;
//!
//!     let mut reader = manager.new_client_named("reader");
//!     reader.acquire_shared(NODE, &[1, 2, 3])?;
//!
//!     let mut writer = manager.new_client_named("writer");
//!     assert!(!writer.try_exclusive(NODE, 2)?);
//!
//!     reader.close()?;
//!     assert!(writer.try_exclusive(NODE, 2)?);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
// Clippy lints configured in workspace Cargo.toml [workspace.lints.clippy]
#![cfg_attr(
    test,
    allow(
        clippy::doc_markdown,
        clippy::uninlined_format_args,
        clippy::single_match_else,
        clippy::cast_lossless,
        clippy::manual_assert,
        clippy::too_many_lines
    )
)]

pub mod client;
pub mod config;
pub mod counters;
pub mod deadlock;
pub mod dump;
pub mod error;
pub mod latch;
pub mod manager;
pub mod mode;
pub(crate) mod pool;
pub mod registry;
pub mod resource;
pub(crate) mod table;

pub use client::{ActiveLock, Client, ClientId, StopHandle};
pub use config::{ConfigError, LockManagerConfig};
pub use counters::{CounterSnapshot, LockCounters};
pub use deadlock::{DeadlockDescription, DeadlockLink};
pub use dump::{ClientDump, HolderDump, LockDump, LockTableDump, PartitionStats};
pub use error::{LockError, Result};
pub use latch::SingleWaiterLatch;
pub use manager::LockManager;
pub use mode::{AcquireMode, LockMode};
pub use registry::ClientRegistry;
pub use resource::{ResourceKey, ResourceType};
