//! Integration tests for the page lock manager

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;

use quarry::concurrency::{LockEvent, LockManager};
use quarry::{PageId, Permissions, TableId, TransactionId};
use rand::Rng;

fn pid(n: u32) -> PageId {
    PageId::new(TableId::new(42), n)
}

#[derive(Default)]
struct Holders {
    readers: HashSet<TransactionId>,
    writer: Option<TransactionId>,
}

/// Replays an audit stream and checks that no page ever had a writer next to
/// another holder.
fn replay(events: impl IntoIterator<Item = LockEvent>) -> usize {
    let mut pages: HashMap<PageId, Holders> = HashMap::new();
    let mut count = 0;

    for event in events {
        count += 1;
        match event {
            LockEvent::Granted {
                tid,
                pid,
                mode: Permissions::ReadOnly,
            } => {
                let h = pages.entry(pid).or_default();
                assert!(h.writer.is_none(), "{} read-locked {} under a writer", tid, pid);
                h.readers.insert(tid);
            }
            LockEvent::Granted {
                tid,
                pid,
                mode: Permissions::ReadWrite,
            } => {
                let h = pages.entry(pid).or_default();
                assert!(h.writer.is_none(), "two writers on {}", pid);
                assert!(h.readers.is_empty(), "{} write-locked {} under readers", tid, pid);
                h.writer = Some(tid);
            }
            LockEvent::Upgraded { tid, pid } => {
                let h = pages.entry(pid).or_default();
                assert!(h.writer.is_none());
                assert_eq!(h.readers.len(), 1);
                assert!(h.readers.contains(&tid));
                h.readers.clear();
                h.writer = Some(tid);
            }
            LockEvent::Released {
                tid,
                pid,
                mode: Permissions::ReadOnly,
            } => {
                let h = pages.entry(pid).or_default();
                assert!(h.readers.remove(&tid));
            }
            LockEvent::Released {
                tid,
                pid,
                mode: Permissions::ReadWrite,
            } => {
                let h = pages.entry(pid).or_default();
                assert_eq!(h.writer, Some(tid));
                h.writer = None;
            }
        }
    }

    for (pid, h) in pages {
        assert!(h.readers.is_empty() && h.writer.is_none(), "{} still held", pid);
    }
    count
}

#[test]
fn test_mutual_exclusion_under_contention() {
    let lm = Arc::new(LockManager::new());
    let events = lm.subscribe();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let lm = Arc::clone(&lm);
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                let mut tid = TransactionId::new();
                for _ in 0..500 {
                    let page = pid(rng.gen_range(0..3));
                    let mode = if rng.gen_bool(0.3) {
                        Permissions::ReadWrite
                    } else {
                        Permissions::ReadOnly
                    };
                    lm.acquire(tid, page, mode);

                    if rng.gen_bool(0.2) {
                        lm.release_all(tid);
                        tid = TransactionId::new();
                    }
                }
                lm.release_all(tid);
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let seen = replay(events.try_iter());
    assert!(seen > 0);
}

#[test]
fn test_upgrade_is_atomic() {
    let lm = LockManager::new();
    let events = lm.subscribe();
    let (t1, t2) = (TransactionId::new(), TransactionId::new());

    assert!(lm.acquire(t1, pid(0), Permissions::ReadOnly));
    assert!(lm.acquire(t1, pid(0), Permissions::ReadWrite));
    assert!(!lm.acquire(t2, pid(0), Permissions::ReadOnly));

    let seen: Vec<_> = events.try_iter().collect();
    assert_eq!(
        seen,
        vec![
            LockEvent::Granted {
                tid: t1,
                pid: pid(0),
                mode: Permissions::ReadOnly
            },
            LockEvent::Upgraded { tid: t1, pid: pid(0) },
        ]
    );
}

#[test]
fn test_upgrade_needs_sole_reader() {
    let lm = LockManager::new();
    let (t1, t2) = (TransactionId::new(), TransactionId::new());

    lm.acquire(t1, pid(0), Permissions::ReadOnly);
    lm.acquire(t2, pid(0), Permissions::ReadOnly);

    // Neither can upgrade while the other reads
    assert!(!lm.acquire(t1, pid(0), Permissions::ReadWrite));
    assert!(!lm.acquire(t2, pid(0), Permissions::ReadWrite));

    lm.release_all(t2);
    assert!(lm.acquire(t1, pid(0), Permissions::ReadWrite));
    assert!(lm.is_write_locked(pid(0)));
}

#[test]
fn test_concurrent_upgrades_at_most_one_wins() {
    for _ in 0..50 {
        let lm = Arc::new(LockManager::new());
        let tids: Vec<_> = (0..4).map(|_| TransactionId::new()).collect();
        for &tid in &tids {
            assert!(lm.acquire(tid, pid(0), Permissions::ReadOnly));
        }

        // Every reader drops out except whoever upgrades first
        let handles: Vec<_> = tids
            .iter()
            .map(|&tid| {
                let lm = Arc::clone(&lm);
                thread::spawn(move || {
                    let won = lm.acquire(tid, pid(0), Permissions::ReadWrite);
                    if !won {
                        lm.release(tid, pid(0), true);
                    }
                    won
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&won| won)
            .count();
        assert!(winners <= 1);
    }
}

#[test]
fn test_lock_sets_track_pages() {
    let lm = LockManager::new();
    let tid = TransactionId::new();

    lm.acquire(tid, pid(0), Permissions::ReadOnly);
    lm.acquire(tid, pid(1), Permissions::ReadWrite);
    lm.acquire(tid, pid(2), Permissions::ReadOnly);

    let mut pages = lm.pages_locked_by(tid);
    pages.sort();
    assert_eq!(pages, vec![pid(0), pid(1), pid(2)]);

    lm.release(tid, pid(2), true);
    let mut pages = lm.pages_locked_by(tid);
    pages.sort();
    assert_eq!(pages, vec![pid(0), pid(1)]);

    lm.release_all(tid);
    assert!(lm.pages_locked_by(tid).is_empty());
    assert!(!lm.is_write_locked(pid(1)));
}
