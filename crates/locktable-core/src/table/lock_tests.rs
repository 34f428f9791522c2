//! Tests for the per-resource lock state machine.

use std::sync::Arc;

use super::entry::{EntryIndex, EntryTable};
use super::lock::{AcquireOutcome, Lock, LockState};
use crate::client::{ClientId, ClientState};
use crate::counters::LockCounters;
use crate::error::LockError;
use crate::mode::{AcquireMode, LockMode};
use crate::resource::{ResourceKey, ResourceType};

const NODE: ResourceType = ResourceType::new(0, "Node");
const KEY: ResourceKey = ResourceKey::new(NODE, 7);

struct Fixture {
    lock: Lock,
    entries: EntryTable,
    counters: LockCounters,
}

impl Fixture {
    fn new() -> Self {
        let lock = Lock {
            resource: Some(KEY),
            ..Lock::default()
        };
        Self {
            lock,
            entries: EntryTable::new(0),
            counters: LockCounters::new(),
        }
    }

    fn entry(&mut self, owner: &Arc<ClientState>, mode: LockMode) -> EntryIndex {
        self.entries
            .allocate(Arc::clone(owner), mode, KEY, &self.counters)
    }

    fn acquire(&mut self, entry: EntryIndex, mode: AcquireMode) -> AcquireOutcome {
        self.lock
            .acquire(&mut self.entries, mode, entry)
            .expect("acquire should not violate invariants")
    }

    fn release(&mut self, entry: EntryIndex) -> LockState {
        self.lock
            .release(&mut self.entries, entry)
            .expect("release should not violate invariants")
    }

    fn shared(&self) -> Vec<EntryIndex> {
        self.lock.shared_holder_list(&self.entries)
    }

    fn waiters(&self) -> Vec<EntryIndex> {
        self.lock.waiter_list(&self.entries)
    }
}

fn client(id: u64, name: &str) -> Arc<ClientState> {
    Arc::new(ClientState::new(ClientId(id), name.to_string()))
}

#[test]
fn test_exclusive_from_idle_and_release_to_idle() {
    let mut fx = Fixture::new();
    let a = client(1, "A");
    let entry = fx.entry(&a, LockMode::Exclusive);

    assert_eq!(fx.acquire(entry, AcquireMode::Blocking), AcquireOutcome::Acquired);
    assert_eq!(fx.lock.exclusive_holder, Some(entry));
    assert!(!fx.lock.is_idle());

    assert_eq!(fx.release(entry), LockState::Idle);
    assert!(fx.lock.is_idle());
}

#[test]
fn test_shared_holders_coexist() {
    let mut fx = Fixture::new();
    let (a, b) = (client(1, "A"), client(2, "B"));
    let ea = fx.entry(&a, LockMode::Shared);
    let eb = fx.entry(&b, LockMode::Shared);

    assert_eq!(fx.acquire(ea, AcquireMode::Blocking), AcquireOutcome::Acquired);
    assert_eq!(fx.acquire(eb, AcquireMode::Blocking), AcquireOutcome::Acquired);
    assert_eq!(fx.shared(), vec![eb, ea]);
    assert_eq!(fx.lock.exclusive_holder, None);

    assert_eq!(fx.release(ea), LockState::Held);
    assert_eq!(fx.release(eb), LockState::Idle);
}

#[test]
fn test_non_blocking_failure_is_not_queued() {
    let mut fx = Fixture::new();
    let (a, b) = (client(1, "A"), client(2, "B"));
    let ea = fx.entry(&a, LockMode::Shared);
    let eb = fx.entry(&b, LockMode::Exclusive);

    fx.acquire(ea, AcquireMode::Blocking);
    assert_eq!(fx.acquire(eb, AcquireMode::NonBlocking), AcquireOutcome::NotAcquired);
    assert!(fx.waiters().is_empty());
    assert!(!b.is_waiting());
}

#[test]
fn test_blocking_failure_queues_and_marks_waiter() {
    let mut fx = Fixture::new();
    let (a, b) = (client(1, "A"), client(2, "B"));
    let ea = fx.entry(&a, LockMode::Exclusive);
    let eb = fx.entry(&b, LockMode::Shared);

    fx.acquire(ea, AcquireMode::Blocking);
    assert_eq!(fx.acquire(eb, AcquireMode::Blocking), AcquireOutcome::MustWait);
    assert_eq!(fx.waiters(), vec![eb]);
    assert_eq!(b.waits_for(), Some(fx.entries.handle(eb)));
}

#[test]
fn test_release_grants_leading_shared_batch_only() {
    let mut fx = Fixture::new();
    let clients: Vec<_> = (1..=5).map(|id| client(id, &format!("C{id}"))).collect();
    let holder = fx.entry(&clients[0], LockMode::Exclusive);
    let s1 = fx.entry(&clients[1], LockMode::Shared);
    let s2 = fx.entry(&clients[2], LockMode::Shared);
    let x3 = fx.entry(&clients[3], LockMode::Exclusive);
    let s4 = fx.entry(&clients[4], LockMode::Shared);

    fx.acquire(holder, AcquireMode::Blocking);
    for entry in [s1, s2, x3, s4] {
        assert_eq!(fx.acquire(entry, AcquireMode::Blocking), AcquireOutcome::MustWait);
    }

    assert_eq!(fx.release(holder), LockState::Held);

    let mut shared = fx.shared();
    shared.sort_by_key(|entry| entry.as_usize());
    assert_eq!(shared, vec![s1, s2]);
    assert_eq!(fx.waiters(), vec![x3, s4]);
    assert!(!clients[1].is_waiting());
    assert!(!clients[2].is_waiting());
    assert!(clients[3].is_waiting());
    assert_eq!(clients[1].latch().available_permits(), 1);
    assert_eq!(clients[3].latch().available_permits(), 0);
}

#[test]
fn test_release_grants_single_exclusive_waiter() {
    let mut fx = Fixture::new();
    let (a, b, c) = (client(1, "A"), client(2, "B"), client(3, "C"));
    let ea = fx.entry(&a, LockMode::Shared);
    let eb = fx.entry(&b, LockMode::Exclusive);
    let ec = fx.entry(&c, LockMode::Exclusive);

    fx.acquire(ea, AcquireMode::Blocking);
    fx.acquire(eb, AcquireMode::Blocking);
    fx.acquire(ec, AcquireMode::Blocking);

    assert_eq!(fx.release(ea), LockState::Held);
    assert_eq!(fx.lock.exclusive_holder, Some(eb));
    assert_eq!(fx.waiters(), vec![ec]);
    assert!(!b.is_waiting());
    assert!(c.is_waiting());
}

#[test]
fn test_shared_request_barges_past_exclusive_waiter() {
    let mut fx = Fixture::new();
    let (a, b, c) = (client(1, "A"), client(2, "B"), client(3, "C"));
    let ea = fx.entry(&a, LockMode::Shared);
    let eb = fx.entry(&b, LockMode::Exclusive);
    let ec = fx.entry(&c, LockMode::Shared);

    fx.acquire(ea, AcquireMode::Blocking);
    fx.acquire(eb, AcquireMode::Blocking);
    assert_eq!(fx.acquire(ec, AcquireMode::Blocking), AcquireOutcome::Acquired);
    assert_eq!(fx.waiters(), vec![eb]);
}

#[test]
fn test_exclusive_owner_may_add_shared_hold() {
    let mut fx = Fixture::new();
    let a = client(1, "A");
    let ex = fx.entry(&a, LockMode::Exclusive);
    let sh = fx.entry(&a, LockMode::Shared);

    fx.acquire(ex, AcquireMode::Blocking);
    assert_eq!(fx.acquire(sh, AcquireMode::Blocking), AcquireOutcome::Acquired);
    assert_eq!(fx.shared(), vec![sh]);

    assert_eq!(fx.release(ex), LockState::Held);
    assert_eq!(fx.release(sh), LockState::Idle);
}

#[test]
fn test_upgrade_immediate_for_sole_shared_holder() {
    let mut fx = Fixture::new();
    let a = client(1, "A");
    let sh = fx.entry(&a, LockMode::Shared);
    let up = fx.entry(&a, LockMode::Upgrade);

    fx.acquire(sh, AcquireMode::Blocking);
    assert_eq!(fx.acquire(up, AcquireMode::Blocking), AcquireOutcome::Acquired);
    assert_eq!(fx.lock.exclusive_holder, Some(up));
    assert_eq!(fx.shared(), vec![sh]);

    assert_eq!(fx.release(sh), LockState::Held);
    assert_eq!(fx.release(up), LockState::Idle);
}

#[test]
fn test_upgrade_queued_ahead_of_exclusive_waiter() {
    let mut fx = Fixture::new();
    let (a, b, c) = (client(1, "A"), client(2, "B"), client(3, "C"));
    let sa = fx.entry(&a, LockMode::Shared);
    let sb = fx.entry(&b, LockMode::Shared);
    let xc = fx.entry(&c, LockMode::Exclusive);
    let ua = fx.entry(&a, LockMode::Upgrade);

    fx.acquire(sa, AcquireMode::Blocking);
    fx.acquire(sb, AcquireMode::Blocking);
    assert_eq!(fx.acquire(xc, AcquireMode::Blocking), AcquireOutcome::MustWait);
    assert_eq!(fx.acquire(ua, AcquireMode::Blocking), AcquireOutcome::MustWait);

    assert_eq!(fx.waiters(), vec![ua, xc]);
}

#[test]
fn test_upgrade_granted_to_sole_shared_holder_despite_exclusive_waiters() {
    let mut fx = Fixture::new();
    let clients: Vec<_> = (1..=4).map(|id| client(id, &format!("C{id}"))).collect();
    let holder = fx.entry(&clients[0], LockMode::Exclusive);
    let s1 = fx.entry(&clients[1], LockMode::Shared);
    let x2 = fx.entry(&clients[2], LockMode::Exclusive);
    let x3 = fx.entry(&clients[3], LockMode::Exclusive);

    fx.acquire(holder, AcquireMode::Blocking);
    fx.acquire(s1, AcquireMode::Blocking);
    fx.acquire(x2, AcquireMode::Blocking);
    fx.acquire(x3, AcquireMode::Blocking);
    assert_eq!(fx.waiters(), vec![s1, x2, x3]);

    // Shared waiter s1 is granted; x2 and x3 stay queued behind it.
    fx.release(holder);
    assert_eq!(fx.shared(), vec![s1]);

    let u1 = fx.entry(&clients[1], LockMode::Upgrade);
    assert_eq!(fx.acquire(u1, AcquireMode::Blocking), AcquireOutcome::Acquired);
    assert_eq!(fx.waiters(), vec![x2, x3]);
}

#[test]
fn test_upgrade_granted_when_other_shared_holder_leaves() {
    let mut fx = Fixture::new();
    let (a, b, c) = (client(1, "A"), client(2, "B"), client(3, "C"));
    let sa = fx.entry(&a, LockMode::Shared);
    let sb = fx.entry(&b, LockMode::Shared);
    let xc = fx.entry(&c, LockMode::Exclusive);
    let ua = fx.entry(&a, LockMode::Upgrade);

    fx.acquire(sa, AcquireMode::Blocking);
    fx.acquire(sb, AcquireMode::Blocking);
    fx.acquire(xc, AcquireMode::Blocking);
    fx.acquire(ua, AcquireMode::Blocking);

    assert_eq!(fx.release(sb), LockState::Held);
    assert_eq!(fx.lock.exclusive_holder, Some(ua));
    assert_eq!(fx.waiters(), vec![xc]);
    assert!(!a.is_waiting());
    assert!(c.is_waiting());

    // Releasing the upgrade leaves A's shared hold in place of C.
    assert_eq!(fx.release(ua), LockState::Held);
    assert_eq!(fx.lock.exclusive_holder, None);
    assert!(c.is_waiting());

    assert_eq!(fx.release(sa), LockState::Held);
    assert_eq!(fx.lock.exclusive_holder, Some(xc));
    assert!(!c.is_waiting());
}

#[test]
fn test_upgrade_waits_for_every_other_shared_holder() {
    let mut fx = Fixture::new();
    let (a, b, c) = (client(1, "A"), client(2, "B"), client(3, "C"));
    let sa = fx.entry(&a, LockMode::Shared);
    let sb = fx.entry(&b, LockMode::Shared);
    let ua = fx.entry(&a, LockMode::Upgrade);

    fx.acquire(sa, AcquireMode::Blocking);
    fx.acquire(sb, AcquireMode::Blocking);
    fx.acquire(ua, AcquireMode::Blocking);

    // C's shared request barges in while the upgrade waits.
    let sc = fx.entry(&c, LockMode::Shared);
    assert_eq!(fx.acquire(sc, AcquireMode::Blocking), AcquireOutcome::Acquired);

    fx.release(sb);
    assert_eq!(fx.lock.exclusive_holder, None, "C still holds shared");
    fx.release(sc);
    assert_eq!(fx.lock.exclusive_holder, Some(ua));
    assert!(fx.waiters().is_empty());
}

#[test]
fn test_error_cleanup_removes_waiter() {
    let mut fx = Fixture::new();
    let (a, b, c) = (client(1, "A"), client(2, "B"), client(3, "C"));
    let ea = fx.entry(&a, LockMode::Exclusive);
    let eb = fx.entry(&b, LockMode::Exclusive);
    let ec = fx.entry(&c, LockMode::Exclusive);

    fx.acquire(ea, AcquireMode::Blocking);
    fx.acquire(eb, AcquireMode::Blocking);
    fx.acquire(ec, AcquireMode::Blocking);

    let state = fx.lock.error_cleanup(&mut fx.entries, eb).unwrap();
    assert_eq!(state, LockState::Held);
    assert_eq!(fx.waiters(), vec![ec]);
    assert!(!b.is_waiting());
    assert_eq!(fx.lock.exclusive_holder, Some(ea));
}

#[test]
fn test_error_cleanup_after_grant_releases_hold() {
    let mut fx = Fixture::new();
    let (a, b) = (client(1, "A"), client(2, "B"));
    let ea = fx.entry(&a, LockMode::Exclusive);
    let eb = fx.entry(&b, LockMode::Exclusive);

    fx.acquire(ea, AcquireMode::Blocking);
    fx.acquire(eb, AcquireMode::Blocking);
    fx.release(ea);
    assert_eq!(fx.lock.exclusive_holder, Some(eb));

    // B was granted, but its wait failed before it noticed.
    let state = fx.lock.error_cleanup(&mut fx.entries, eb).unwrap();
    assert_eq!(state, LockState::Idle);
    assert!(fx.lock.is_idle());
}

#[test]
fn test_upgrade_victim_cleanup_lets_other_upgrade_proceed() {
    let mut fx = Fixture::new();
    let (a, b) = (client(1, "A"), client(2, "B"));
    let sa = fx.entry(&a, LockMode::Shared);
    let sb = fx.entry(&b, LockMode::Shared);
    let ua = fx.entry(&a, LockMode::Upgrade);
    let ub = fx.entry(&b, LockMode::Upgrade);

    fx.acquire(sa, AcquireMode::Blocking);
    fx.acquire(sb, AcquireMode::Blocking);
    fx.acquire(ua, AcquireMode::Blocking);
    fx.acquire(ub, AcquireMode::Blocking);
    assert_eq!(fx.waiters(), vec![ua, ub]);

    // A is the deadlock victim: its upgrade goes, its shared hold stays.
    fx.lock.error_cleanup(&mut fx.entries, ua).unwrap();
    assert_eq!(fx.waiters(), vec![ub]);
    assert!(b.is_waiting());

    fx.release(sa);
    assert_eq!(fx.lock.exclusive_holder, Some(ub));
    assert!(!b.is_waiting());
}

#[test]
fn test_release_of_non_holder_is_invariant_violation() {
    let mut fx = Fixture::new();
    let a = client(1, "A");
    let entry = fx.entry(&a, LockMode::Exclusive);

    let err = fx.lock.release(&mut fx.entries, entry).unwrap_err();
    assert!(matches!(err, LockError::InvariantViolation(_)));
}

#[test]
fn test_error_cleanup_of_unknown_entry_is_invariant_violation() {
    let mut fx = Fixture::new();
    let a = client(1, "A");
    let entry = fx.entry(&a, LockMode::Shared);

    let err = fx.lock.error_cleanup(&mut fx.entries, entry).unwrap_err();
    assert!(matches!(err, LockError::InvariantViolation(_)));
}

#[test]
fn test_waiting_client_cannot_request_again() {
    let mut fx = Fixture::new();
    let (a, b) = (client(1, "A"), client(2, "B"));
    let ea = fx.entry(&a, LockMode::Exclusive);
    let eb = fx.entry(&b, LockMode::Exclusive);
    let eb2 = fx.entry(&b, LockMode::Shared);

    fx.acquire(ea, AcquireMode::Blocking);
    fx.acquire(eb, AcquireMode::Blocking);

    let err = fx
        .lock
        .acquire(&mut fx.entries, AcquireMode::Blocking, eb2)
        .unwrap_err();
    assert!(matches!(err, LockError::InvariantViolation(_)));
}

#[test]
fn test_upgrade_without_shared_hold_is_invariant_violation() {
    let mut fx = Fixture::new();
    let a = client(1, "A");
    let up = fx.entry(&a, LockMode::Upgrade);

    let err = fx
        .lock
        .acquire(&mut fx.entries, AcquireMode::Blocking, up)
        .unwrap_err();
    assert!(matches!(err, LockError::InvariantViolation(_)));
}
