//! Multi-threaded integration tests: mutual exclusion and reader sharing.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use locktable_core::{LockError, LockManager, LockManagerConfig, ResourceType};

const NODE: ResourceType = ResourceType::new(0, "Node");
const RELATIONSHIP: ResourceType = ResourceType::new(1, "Relationship");

fn manager() -> Arc<LockManager> {
    Arc::new(
        LockManager::new(
            LockManagerConfig::default()
                .with_partitions(8)
                .with_resource_types(2)
                .with_deadlock_check_interval(Duration::from_millis(10)),
        )
        .expect("valid config"),
    )
}

#[test]
fn test_exclusive_locks_are_mutually_exclusive() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 200;

    let manager = manager();
    let inside = Arc::new(AtomicBool::new(false));
    let entered = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let manager = Arc::clone(&manager);
            let inside = Arc::clone(&inside);
            let entered = Arc::clone(&entered);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut client = manager.new_client_named(format!("writer-{i}"));
                barrier.wait();
                for _ in 0..ROUNDS {
                    client.acquire_exclusive(NODE, &[1]).expect("acquire");
                    assert!(
                        !inside.swap(true, Ordering::SeqCst),
                        "two exclusive holders at once"
                    );
                    entered.fetch_add(1, Ordering::Relaxed);
                    inside.store(false, Ordering::SeqCst);
                    client.release_exclusive(NODE, &[1]).expect("release");
                }
                client.close().expect("close");
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("writer thread panicked");
    }

    assert_eq!(entered.load(Ordering::Relaxed), THREADS * ROUNDS);
    assert_eq!(manager.live_lock_count(), 0);
    assert!(manager.registry().is_empty());
}

#[test]
fn test_readers_share_and_writer_excludes_them() {
    const READERS: usize = 6;
    const ROUNDS: usize = 100;

    let manager = manager();
    let readers_inside = Arc::new(AtomicUsize::new(0));
    let writer_inside = Arc::new(AtomicBool::new(false));
    let barrier = Arc::new(Barrier::new(READERS + 1));

    let mut handles: Vec<_> = (0..READERS)
        .map(|i| {
            let manager = Arc::clone(&manager);
            let readers_inside = Arc::clone(&readers_inside);
            let writer_inside = Arc::clone(&writer_inside);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut client = manager.new_client_named(format!("reader-{i}"));
                barrier.wait();
                for _ in 0..ROUNDS {
                    client.acquire_shared(RELATIONSHIP, &[9]).expect("acquire shared");
                    readers_inside.fetch_add(1, Ordering::SeqCst);
                    assert!(!writer_inside.load(Ordering::SeqCst), "reader saw writer");
                    readers_inside.fetch_sub(1, Ordering::SeqCst);
                    client.release_shared(RELATIONSHIP, &[9]).expect("release shared");
                }
            })
        })
        .collect();

    {
        let manager = Arc::clone(&manager);
        let readers_inside = Arc::clone(&readers_inside);
        let writer_inside = Arc::clone(&writer_inside);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            let mut client = manager.new_client_named("writer");
            barrier.wait();
            for _ in 0..ROUNDS {
                client.acquire_exclusive(RELATIONSHIP, &[9]).expect("acquire exclusive");
                writer_inside.store(true, Ordering::SeqCst);
                assert_eq!(readers_inside.load(Ordering::SeqCst), 0, "writer saw reader");
                writer_inside.store(false, Ordering::SeqCst);
                client.release_exclusive(RELATIONSHIP, &[9]).expect("release exclusive");
            }
        }));
    }

    for handle in handles {
        handle.join().expect("thread panicked");
    }
    assert_eq!(manager.live_lock_count(), 0);
}

#[test]
fn test_many_resources_across_partitions() {
    const THREADS: u64 = 4;
    const RESOURCES: u64 = 64;

    let manager = manager();
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                let mut client = manager.new_client();
                // Disjoint ranges: no conflicts, every partition touched.
                let ids: Vec<u64> = (0..RESOURCES).map(|i| t * RESOURCES + i).collect();
                client.acquire_exclusive(NODE, &ids).expect("acquire");
                assert_eq!(client.active_lock_count(), ids.len());
                client.close().expect("close");
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("thread panicked");
    }

    let counters = manager.counters();
    assert_eq!(counters.exclusive_acquires, THREADS * RESOURCES);
    assert_eq!(counters.exclusive_releases, THREADS * RESOURCES);
    assert_eq!(counters.waits, 0);
    assert_eq!(manager.live_lock_count(), 0);
}

#[test]
fn test_upgrade_waits_for_other_readers() {
    let manager = manager();
    let mut upgrader = manager.new_client_named("upgrader");
    let mut reader = manager.new_client_named("reader");

    upgrader.acquire_shared(NODE, &[5]).expect("shared");
    reader.acquire_shared(NODE, &[5]).expect("shared");

    let upgraded = Arc::new(AtomicBool::new(false));
    let handle = {
        let upgraded = Arc::clone(&upgraded);
        thread::spawn(move || {
            upgrader.acquire_exclusive(NODE, &[5]).expect("upgrade");
            upgraded.store(true, Ordering::SeqCst);
            upgrader
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert!(!upgraded.load(Ordering::SeqCst), "upgrade must wait for reader");

    reader.release_shared(NODE, &[5]).expect("release");
    let mut upgrader = handle.join().expect("upgrader panicked");
    assert!(upgraded.load(Ordering::SeqCst));
    assert!(!reader.try_shared(NODE, 5).expect("try"));

    upgrader.close().expect("close");
    assert!(reader.try_shared(NODE, 5).expect("try"));
}

#[test]
fn test_closed_client_rejects_requests_from_any_thread() {
    let manager = manager();
    let mut client = manager.new_client();
    client.close().expect("close");

    let err = thread::spawn(move || client.acquire_exclusive(NODE, &[1]))
        .join()
        .expect("thread panicked")
        .unwrap_err();
    assert!(matches!(err, LockError::Closed));
}
