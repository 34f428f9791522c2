//! Lock modes and acquisition styles.

use std::fmt;

use serde::Serialize;

/// Mode in which a lock entry holds or waits for a lock.
///
/// `Upgrade` is never requested by callers directly: it is what an
/// exclusive request becomes when the same client already holds the
/// resource in shared mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockMode {
    /// Compatible with other shared holders.
    #[default]
    Shared,
    /// Incompatible with every other holder.
    Exclusive,
    /// Exclusive hold layered on top of the requester's own shared hold.
    Upgrade,
}

impl LockMode {
    /// Returns `true` for modes that exclude all other clients.
    #[inline]
    #[must_use]
    pub const fn is_exclusive_class(self) -> bool {
        matches!(self, Self::Exclusive | Self::Upgrade)
    }

    /// Returns `true` if a hold in `self` satisfies a request for `requested`.
    ///
    /// Only a shared hold satisfies a shared request; an exclusive holder
    /// asking for shared takes a separate entry. Exclusive and upgrade holds
    /// satisfy an exclusive request.
    #[inline]
    #[must_use]
    pub const fn covers(self, requested: Self) -> bool {
        match requested {
            Self::Shared => matches!(self, Self::Shared),
            Self::Exclusive | Self::Upgrade => self.is_exclusive_class(),
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Shared => "SHARED",
            Self::Exclusive => "EXCLUSIVE",
            Self::Upgrade => "UPGRADE",
        })
    }
}

/// Whether an acquire may park the calling thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireMode {
    /// Wait until granted, stopped, or chosen as a deadlock victim.
    Blocking,
    /// Return immediately if the lock cannot be granted.
    NonBlocking,
}
