//! Lock table observability counters.
//!
//! Always-on atomic counters, one set per lock manager. They count calls into
//! the global lock state machine (not client-local reentrant hits), so they
//! double as the instrumentation for reentrancy and upgrade-folding checks.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::mode::LockMode;

/// Lock table counters.
///
/// All counters use relaxed ordering since they are advisory/diagnostic
/// and do not need to synchronize with other operations.
#[derive(Debug, Default)]
pub struct LockCounters {
    shared_acquires: AtomicU64,
    exclusive_acquires: AtomicU64,
    upgrade_acquires: AtomicU64,
    shared_releases: AtomicU64,
    exclusive_releases: AtomicU64,
    upgrade_releases: AtomicU64,
    waits: AtomicU64,
    detection_passes: AtomicU64,
    deadlocks: AtomicU64,
    error_cleanups: AtomicU64,
    invariant_violations: AtomicU64,
    locks_recycled: AtomicU64,
    entries_recycled: AtomicU64,
}

impl LockCounters {
    /// Creates a new counter set with all values at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            shared_acquires: AtomicU64::new(0),
            exclusive_acquires: AtomicU64::new(0),
            upgrade_acquires: AtomicU64::new(0),
            shared_releases: AtomicU64::new(0),
            exclusive_releases: AtomicU64::new(0),
            upgrade_releases: AtomicU64::new(0),
            waits: AtomicU64::new(0),
            detection_passes: AtomicU64::new(0),
            deadlocks: AtomicU64::new(0),
            error_cleanups: AtomicU64::new(0),
            invariant_violations: AtomicU64::new(0),
            locks_recycled: AtomicU64::new(0),
            entries_recycled: AtomicU64::new(0),
        }
    }

    /// Counts a global acquire request in `mode`.
    #[inline]
    pub(crate) fn record_acquire(&self, mode: LockMode) {
        let counter = match mode {
            LockMode::Shared => &self.shared_acquires,
            LockMode::Exclusive => &self.exclusive_acquires,
            LockMode::Upgrade => &self.upgrade_acquires,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a global release in `mode`.
    #[inline]
    pub(crate) fn record_release(&self, mode: LockMode) {
        let counter = match mode {
            LockMode::Shared => &self.shared_releases,
            LockMode::Exclusive => &self.exclusive_releases,
            LockMode::Upgrade => &self.upgrade_releases,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_wait(&self) {
        self.waits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_detection_pass(&self) {
        self.detection_passes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_deadlock(&self) {
        self.deadlocks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_error_cleanup(&self) {
        self.error_cleanups.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_invariant_violation(&self) {
        self.invariant_violations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_lock_recycled(&self) {
        self.locks_recycled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_entry_recycled(&self) {
        self.entries_recycled.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            shared_acquires: self.shared_acquires.load(Ordering::Relaxed),
            exclusive_acquires: self.exclusive_acquires.load(Ordering::Relaxed),
            upgrade_acquires: self.upgrade_acquires.load(Ordering::Relaxed),
            shared_releases: self.shared_releases.load(Ordering::Relaxed),
            exclusive_releases: self.exclusive_releases.load(Ordering::Relaxed),
            upgrade_releases: self.upgrade_releases.load(Ordering::Relaxed),
            waits: self.waits.load(Ordering::Relaxed),
            detection_passes: self.detection_passes.load(Ordering::Relaxed),
            deadlocks: self.deadlocks.load(Ordering::Relaxed),
            error_cleanups: self.error_cleanups.load(Ordering::Relaxed),
            invariant_violations: self.invariant_violations.load(Ordering::Relaxed),
            locks_recycled: self.locks_recycled.load(Ordering::Relaxed),
            entries_recycled: self.entries_recycled.load(Ordering::Relaxed),
        }
    }
}

/// Immutable snapshot of counter values for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub struct CounterSnapshot {
    pub shared_acquires: u64,
    pub exclusive_acquires: u64,
    pub upgrade_acquires: u64,
    pub shared_releases: u64,
    pub exclusive_releases: u64,
    pub upgrade_releases: u64,
    pub waits: u64,
    pub detection_passes: u64,
    pub deadlocks: u64,
    pub error_cleanups: u64,
    pub invariant_violations: u64,
    pub locks_recycled: u64,
    pub entries_recycled: u64,
}

impl CounterSnapshot {
    /// Total global acquire requests across all modes.
    #[must_use]
    pub const fn total_acquires(&self) -> u64 {
        self.shared_acquires + self.exclusive_acquires + self.upgrade_acquires
    }

    /// Total global releases across all modes.
    #[must_use]
    pub const fn total_releases(&self) -> u64 {
        self.shared_releases + self.exclusive_releases + self.upgrade_releases
    }
}
