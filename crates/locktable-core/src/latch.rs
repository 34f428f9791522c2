//! Single-waiter wakeup latch.
//!
//! A binary-semaphore-like primitive tuned for exactly one waiting thread
//! (the client that owns it) and any number of releasing threads (whoever
//! grants the client a lock, or stops it).
//!
//! A `release` that happens before the owner starts waiting is kept as a
//! permit, so a grant delivered between "enqueue on the wait list" and
//! "park" is never lost.
//!
//! # State encoding
//!
//! - `state <= OPEN`: `OPEN - state + 1` permits are available
//! - `CLOSED`: no permit, nobody parked
//! - `WAITING`: no permit, the owner is parked (or about to park)

use std::sync::atomic::{AtomicI32, Ordering};
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

const OPEN: i32 = 0;
const CLOSED: i32 = 1;
const WAITING: i32 = 2;

/// Spin/yield iterations before parking.
const SPIN_LIMIT: u32 = 64;

/// Wakeup latch with permit semantics for a single waiting thread.
#[derive(Debug)]
pub struct SingleWaiterLatch {
    state: AtomicI32,
    waiter: Mutex<Option<Thread>>,
}

impl Default for SingleWaiterLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl SingleWaiterLatch {
    /// Creates a closed latch (no permits).
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicI32::new(CLOSED),
            waiter: parking_lot::const_mutex(None),
        }
    }

    /// Consumes a permit, waiting up to `timeout` for one.
    ///
    /// Returns `false` on timeout. Must only be called by the owning thread.
    pub fn try_acquire(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut spins = SPIN_LIMIT;

        loop {
            let current = self.state.load(Ordering::Acquire);
            if current <= OPEN {
                if self
                    .state
                    .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    return true;
                }
                continue;
            }

            if spins > 0 {
                spins -= 1;
                thread::yield_now();
                continue;
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }

            *self.waiter.lock() = Some(thread::current());
            if self
                .state
                .compare_exchange(CLOSED, WAITING, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                thread::park_timeout(deadline - now);
                // Back out of WAITING unless a releaser already opened the latch.
                let _ = self.state.compare_exchange(
                    WAITING,
                    CLOSED,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
            }
            *self.waiter.lock() = None;
        }
    }

    /// Adds one permit, waking the owner if it is parked.
    pub fn release(&self) {
        loop {
            let current = self.state.load(Ordering::Acquire);
            let next = if current == WAITING || current == CLOSED {
                OPEN
            } else {
                current - 1
            };
            if self
                .state
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                if current == WAITING {
                    if let Some(waiter) = self.waiter.lock().as_ref() {
                        waiter.unpark();
                    }
                }
                return;
            }
        }
    }

    /// Discards every pending permit.
    pub fn drain(&self) {
        let mut current = self.state.load(Ordering::Acquire);
        while current <= OPEN {
            match self.state.compare_exchange(
                current,
                CLOSED,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Returns the number of pending permits.
    #[must_use]
    pub fn available_permits(&self) -> u32 {
        let current = self.state.load(Ordering::Acquire);
        if current <= OPEN {
            (OPEN - current).unsigned_abs() + 1
        } else {
            0
        }
    }
}
