//! Error types for the lock table.

use thiserror::Error;

use crate::config::ConfigError;
use crate::deadlock::DeadlockDescription;

/// Lock table error types.
///
/// A non-blocking acquire that cannot be granted is not an error: the
/// `try_*` methods return `Ok(false)` for it.
#[derive(Error, Debug)]
pub enum LockError {
    /// The calling client closed a wait-for cycle and was aborted.
    ///
    /// Its in-flight wait was torn down. Locks it already held are kept.
    #[error("Deadlock detected: {0}")]
    Deadlock(DeadlockDescription),

    /// The client was stopped before or while waiting for a lock.
    #[error("Client was stopped while acquiring a lock")]
    Stopped,

    /// The client has been closed and can no longer take or release locks.
    #[error("Client is closed")]
    Closed,

    /// A resource type id outside the configured range was used.
    #[error("Unknown resource type {name} (id {id}), lock table has {configured} resource types")]
    UnknownResourceType {
        /// Resource type name.
        name: &'static str,
        /// Resource type id.
        id: u32,
        /// Number of resource types the table was built for.
        configured: usize,
    },

    /// The lock graph is in a state it can never legally reach.
    #[error("Lock table invariant violated: {0}")]
    InvariantViolation(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl LockError {
    /// Returns `true` if retrying the whole unit of work may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Deadlock(_))
    }

    /// Returns the deadlock chain if this is a deadlock error.
    #[must_use]
    pub const fn deadlock(&self) -> Option<&DeadlockDescription> {
        match self {
            Self::Deadlock(description) => Some(description),
            _ => None,
        }
    }

    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation(message.into())
    }
}

/// Result type alias for lock table operations.
pub type Result<T> = std::result::Result<T, LockError>;
