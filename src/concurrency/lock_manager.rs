use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::trace;

use crate::common::{PageId, Permissions, TransactionId};

/// A state transition of one page's lock, published to audit subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockEvent {
    /// `tid` gained a hold of the given mode
    Granted {
        tid: TransactionId,
        pid: PageId,
        mode: Permissions,
    },
    /// `tid` turned its sole shared hold into an exclusive one
    Upgraded { tid: TransactionId, pid: PageId },
    /// `tid` gave up a hold of the given mode
    Released {
        tid: TransactionId,
        pid: PageId,
        mode: Permissions,
    },
}

/// Current holders of one page's lock.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockHolders {
    pub readers: Vec<TransactionId>,
    pub writer: Option<TransactionId>,
}

/// Holder sets of a single page.
/// Never both a non-empty reader set and a writer.
#[derive(Debug, Default)]
struct LockState {
    readers: HashSet<TransactionId>,
    writer: Option<TransactionId>,
}

impl LockState {
    fn is_free(&self) -> bool {
        self.readers.is_empty() && self.writer.is_none()
    }

    fn mode_of(&self, tid: TransactionId) -> Option<Permissions> {
        if self.writer == Some(tid) {
            Some(Permissions::ReadWrite)
        } else if self.readers.contains(&tid) {
            Some(Permissions::ReadOnly)
        } else {
            None
        }
    }

    fn check(&self) {
        debug_assert!(
            self.readers.is_empty() || self.writer.is_none(),
            "page has readers and a writer at the same time"
        );
    }
}

/// Per-page shared/exclusive lock table with lock upgrade.
///
/// Each page has its own critical section, so requests for unrelated pages
/// never serialize on each other. `acquire` never blocks; waiting is the
/// caller's business (see `BufferPool::get_page`).
///
/// Strict two-phase locking is a usage policy: locks are meant to be
/// released only through `release_all` at transaction end.
#[derive(Default)]
pub struct LockManager {
    /// Lazily created per-page lock state; entries are never removed
    page_locks: RwLock<HashMap<PageId, Arc<Mutex<LockState>>>>,
    /// Pages each live transaction holds a lock on
    txn_pages: Mutex<HashMap<TransactionId, HashSet<PageId>>>,
    /// Audit subscribers
    subscribers: RwLock<Vec<Sender<LockEvent>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a stream of every lock state transition from now on.
    /// Events of one page arrive in the order the transitions happened.
    pub fn subscribe(&self) -> Receiver<LockEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.write().push(tx);
        rx
    }

    fn publish(&self, event: LockEvent) {
        let subscribers = self.subscribers.read();
        for tx in subscribers.iter() {
            let _ = tx.send(event);
        }
    }

    fn page_lock(&self, pid: PageId) -> Arc<Mutex<LockState>> {
        if let Some(lock) = self.page_locks.read().get(&pid) {
            return Arc::clone(lock);
        }
        Arc::clone(self.page_locks.write().entry(pid).or_default())
    }

    fn existing_page_lock(&self, pid: PageId) -> Option<Arc<Mutex<LockState>>> {
        self.page_locks.read().get(&pid).cloned()
    }

    /// Makes a single attempt to lock `pid` for `tid` in the given mode.
    ///
    /// A shared request succeeds when the page has no writer or `tid` is the
    /// writer. An exclusive request succeeds when the page is free, `tid` is
    /// already the writer, or `tid` is the sole reader (upgrade).
    pub fn acquire(&self, tid: TransactionId, pid: PageId, mode: Permissions) -> bool {
        let lock = self.page_lock(pid);
        let mut state = lock.lock();

        let granted = match mode {
            Permissions::ReadOnly => match state.writer {
                None => {
                    if state.readers.insert(tid) {
                        self.publish(LockEvent::Granted { tid, pid, mode });
                    }
                    true
                }
                Some(writer) => writer == tid,
            },
            Permissions::ReadWrite => {
                if state.is_free() {
                    state.writer = Some(tid);
                    self.publish(LockEvent::Granted { tid, pid, mode });
                    true
                } else if state.writer == Some(tid) {
                    true
                } else if state.readers.len() == 1 && state.readers.contains(&tid) {
                    state.readers.clear();
                    state.writer = Some(tid);
                    self.publish(LockEvent::Upgraded { tid, pid });
                    trace!(%tid, %pid, "lock upgraded");
                    true
                } else {
                    false
                }
            }
        };
        state.check();

        if granted {
            self.txn_pages.lock().entry(tid).or_default().insert(pid);
        }
        granted
    }

    /// Releases `tid`'s hold on `pid`.
    ///
    /// With `read_only` set only a shared hold is dropped and an exclusive
    /// hold survives. The page leaves `tid`'s lock set once `tid` holds
    /// nothing on it.
    pub fn release(&self, tid: TransactionId, pid: PageId, read_only: bool) {
        let Some(lock) = self.existing_page_lock(pid) else {
            return;
        };
        let mut state = lock.lock();

        if state.readers.remove(&tid) {
            self.publish(LockEvent::Released {
                tid,
                pid,
                mode: Permissions::ReadOnly,
            });
        }
        if !read_only && state.writer == Some(tid) {
            state.writer = None;
            self.publish(LockEvent::Released {
                tid,
                pid,
                mode: Permissions::ReadWrite,
            });
        }
        state.check();

        if state.mode_of(tid).is_none() {
            if let Some(pages) = self.txn_pages.lock().get_mut(&tid) {
                pages.remove(&pid);
            }
        }
    }

    /// Releases every lock `tid` holds and forgets its lock set.
    /// Calling it again for the same transaction is a no-op.
    pub fn release_all(&self, tid: TransactionId) {
        let Some(pages) = self.txn_pages.lock().remove(&tid) else {
            return;
        };
        trace!(%tid, pages = pages.len(), "releasing all locks");

        for pid in pages {
            let Some(lock) = self.existing_page_lock(pid) else {
                continue;
            };
            let mut state = lock.lock();
            if state.readers.remove(&tid) {
                self.publish(LockEvent::Released {
                    tid,
                    pid,
                    mode: Permissions::ReadOnly,
                });
            }
            if state.writer == Some(tid) {
                state.writer = None;
                self.publish(LockEvent::Released {
                    tid,
                    pid,
                    mode: Permissions::ReadWrite,
                });
            }
            state.check();
        }
    }

    /// Returns true if any transaction holds a lock on `pid`.
    ///
    /// `_tid` is not consulted: this answers "is the page locked at all".
    /// Use `lock_mode` to ask about one transaction.
    pub fn holds(&self, _tid: TransactionId, pid: PageId) -> bool {
        self.existing_page_lock(pid)
            .map(|lock| !lock.lock().is_free())
            .unwrap_or(false)
    }

    /// Returns the mode in which `tid` holds `pid`, if at all.
    pub fn lock_mode(&self, tid: TransactionId, pid: PageId) -> Option<Permissions> {
        self.existing_page_lock(pid)
            .and_then(|lock| lock.lock().mode_of(tid))
    }

    /// Returns true if some transaction holds `pid` exclusively.
    pub fn is_write_locked(&self, pid: PageId) -> bool {
        self.existing_page_lock(pid)
            .map(|lock| lock.lock().writer.is_some())
            .unwrap_or(false)
    }

    /// Returns the pages `tid` currently holds locks on.
    pub fn pages_locked_by(&self, tid: TransactionId) -> Vec<PageId> {
        self.txn_pages
            .lock()
            .get(&tid)
            .map(|pages| pages.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Returns the current holders of `pid`.
    pub fn holders(&self, pid: PageId) -> LockHolders {
        self.existing_page_lock(pid)
            .map(|lock| {
                let state = lock.lock();
                LockHolders {
                    readers: state.readers.iter().copied().collect(),
                    writer: state.writer,
                }
            })
            .unwrap_or_default()
    }
}
