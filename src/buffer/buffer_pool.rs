use std::sync::Arc;
use std::thread;
use std::time::Duration;

use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tracing::{debug, trace, warn};

use crate::catalog::Catalog;
use crate::common::{
    BufferPoolConfig, PageId, Permissions, QuarryError, Result, TableId, TransactionId,
};
use crate::concurrency::LockManager;
use crate::storage::page::{HeapPage, Page};
use crate::tuple::Tuple;

use super::PageHandle;

type CachedPage = Arc<RwLock<HeapPage>>;

/// BufferPool caches pages read from heap files and is the only way
/// transactions reach them. Every access goes through the lock manager first.
///
/// The pool is NO-STEAL: a dirty page is never written back before its
/// transaction commits, so eviction only ever picks clean pages. Pages held
/// exclusively by a live transaction are never evicted either, so an abort
/// can always roll them back from their in-memory before-image.
///
/// Lock order is cache mutex, then page latch. Code holding a page latch
/// never takes the cache mutex.
pub struct BufferPool {
    /// Tables the pool can fault pages in from
    catalog: Arc<Catalog>,
    /// Capacity and lock retry settings
    config: BufferPoolConfig,
    /// Resident pages in access order; capacity is enforced by `fetch`
    cache: Mutex<LruCache<PageId, CachedPage>>,
    /// Page-level shared/exclusive locks
    lock_manager: LockManager,
}

impl BufferPool {
    /// Creates an empty pool over the tables of `catalog`.
    pub fn new(catalog: Arc<Catalog>, config: BufferPoolConfig) -> Self {
        Self {
            catalog,
            config,
            cache: Mutex::new(LruCache::unbounded()),
            lock_manager: LockManager::new(),
        }
    }

    /// Returns the maximum number of resident pages.
    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Returns the number of resident pages.
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }

    /// Returns true if the page is resident. Does not touch recency.
    pub fn is_cached(&self, pid: PageId) -> bool {
        self.cache.lock().contains(&pid)
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.lock_manager
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Returns the page with the requested permission, reading it from its
    /// heap file if it isn't resident.
    ///
    /// Blocks by polling the lock manager until the lock is granted or the
    /// retry budget runs out, in which case it fails with
    /// `TransactionAborted`. Nothing is rolled back here; the caller is
    /// expected to abort `tid` with `transaction_complete(tid, false)`.
    pub fn get_page(
        &self,
        tid: TransactionId,
        pid: PageId,
        perm: Permissions,
    ) -> Result<PageHandle> {
        self.fetch(pid)?;
        self.lock_page(tid, pid, perm)?;

        // A clean page may have been evicted while we waited for the lock.
        // Hand back whichever instance is resident now.
        let page = self.fetch(pid)?;
        Ok(PageHandle::new(pid, page, perm))
    }

    /// Returns the resident instance of `pid`, faulting it in if needed.
    /// Check, read, evict and insert all happen under the cache mutex, so two
    /// concurrent faults of one page read it from disk only once.
    fn fetch(&self, pid: PageId) -> Result<CachedPage> {
        let mut cache = self.cache.lock();
        if let Some(page) = cache.get(&pid) {
            return Ok(Arc::clone(page));
        }

        let file = self.catalog.heap_file(pid.table_id)?;
        let page = file.read_page(pid)?;

        while cache.len() >= self.config.capacity {
            self.evict_locked(&mut cache)?;
        }

        let page = Arc::new(RwLock::new(page));
        cache.put(pid, Arc::clone(&page));
        debug!(%pid, resident = cache.len(), "page faulted in");
        Ok(page)
    }

    fn lock_page(&self, tid: TransactionId, pid: PageId, perm: Permissions) -> Result<()> {
        let policy = &self.config.retry;
        let max_backoff = policy.max_backoff.as_micros() as u64;
        let mut rng = rand::thread_rng();

        for attempt in 1..=policy.max_attempts {
            if self.lock_manager.acquire(tid, pid, perm) {
                return Ok(());
            }
            if attempt < policy.max_attempts {
                trace!(%tid, %pid, attempt, "lock busy, backing off");
                thread::sleep(Duration::from_micros(rng.gen_range(0..=max_backoff)));
            }
        }

        warn!(
            %tid,
            %pid,
            ?perm,
            attempts = policy.max_attempts,
            "lock retry budget exhausted"
        );
        Err(QuarryError::TransactionAborted(tid))
    }

    /// Inserts a tuple into the given table on behalf of `tid`.
    /// The tuple's record id is set to where it landed.
    pub fn insert_tuple(
        &self,
        tid: TransactionId,
        table_id: TableId,
        tuple: &mut Tuple,
    ) -> Result<()> {
        let file = self.catalog.heap_file(table_id)?;
        let touched = file.insert_tuple(self, tid, tuple)?;

        for handle in touched {
            handle.write()?.mark_dirty(Some(tid));
            self.reinstate(&handle)?;
        }
        Ok(())
    }

    /// Deletes a tuple from the table its record id points into.
    pub fn delete_tuple(&self, tid: TransactionId, tuple: &Tuple) -> Result<()> {
        let rid = tuple.record_id().ok_or(QuarryError::MissingRecordId)?;
        let file = self.catalog.heap_file(rid.page_id.table_id)?;
        let handle = file.delete_tuple(self, tid, tuple)?;
        handle.write()?.mark_dirty(Some(tid));
        Ok(())
    }

    /// Makes sure the mutated instance behind `handle` is the resident one.
    fn reinstate(&self, handle: &PageHandle) -> Result<()> {
        let pid = handle.page_id();
        let mut cache = self.cache.lock();
        match cache.get(&pid).map(|resident| Arc::ptr_eq(resident, handle.shared())) {
            Some(true) => return Ok(()),
            Some(false) => {}
            None => {
                while cache.len() >= self.config.capacity {
                    self.evict_locked(&mut cache)?;
                }
            }
        }
        cache.put(pid, Arc::clone(handle.shared()));
        trace!(%pid, "mutated page reinstated");
        Ok(())
    }

    /// Finishes `tid`. On commit its dirty pages are written to disk and
    /// become the new before-images; on abort they are rolled back to their
    /// before-images without touching disk. Either way every lock `tid`
    /// holds is released, even if a flush fails; the first error is returned.
    ///
    /// A page that could not be reconciled is dropped from the cache before
    /// the locks go, so its unflushed changes are never seen by another
    /// transaction or written out later. The next fault rereads it from disk.
    pub fn transaction_complete(&self, tid: TransactionId, commit: bool) -> Result<()> {
        let mut first_err = None;
        let mut failed = Vec::new();
        let mut reconciled = 0usize;

        for pid in self.lock_manager.pages_locked_by(tid) {
            let resident = self.cache.lock().peek(&pid).cloned();
            let Some(page) = resident else {
                continue;
            };

            let mut guard = page.write();
            if guard.is_dirty().is_none() {
                continue;
            }

            let outcome = if commit {
                self.write_back(&mut guard).map(|()| guard.set_before_image())
            } else {
                guard.before_image().map(|restored| *guard = restored)
            };
            match outcome {
                Ok(()) => reconciled += 1,
                Err(e) => {
                    warn!(%tid, %pid, error = %e, commit, "page reconciliation failed");
                    first_err.get_or_insert(e);
                    failed.push(pid);
                }
            }
        }

        // Page latches are all dropped by now
        if !failed.is_empty() {
            let mut cache = self.cache.lock();
            for pid in failed {
                if cache.pop(&pid).is_some() {
                    warn!(%tid, %pid, "unreconciled page dropped from cache");
                }
            }
        }

        self.lock_manager.release_all(tid);
        debug!(%tid, commit, pages = reconciled, "transaction complete");

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Writes a dirty page to its heap file and marks it clean.
    fn write_back(&self, page: &mut HeapPage) -> Result<()> {
        if page.is_dirty().is_none() {
            return Ok(());
        }
        let file = self.catalog.heap_file(page.id().table_id)?;
        file.write_page(&*page)?;
        page.mark_dirty(None);
        Ok(())
    }

    fn flush_page(&self, pid: PageId) -> Result<()> {
        let resident = self.cache.lock().peek(&pid).cloned();
        match resident {
            Some(page) => self.write_back(&mut page.write()),
            None => Ok(()),
        }
    }

    /// Writes every dirty resident page to disk.
    ///
    /// This bypasses NO-STEAL: uncommitted changes become durable. Meant for
    /// shutdown and tests.
    pub fn flush_all_pages(&self) -> Result<()> {
        let pids: Vec<PageId> = self.cache.lock().iter().map(|(pid, _)| *pid).collect();
        for pid in pids {
            self.flush_page(pid)?;
        }
        Ok(())
    }

    /// Writes the dirty resident pages `tid` holds locks on.
    pub fn flush_pages(&self, tid: TransactionId) -> Result<()> {
        for pid in self.lock_manager.pages_locked_by(tid) {
            self.flush_page(pid)?;
        }
        Ok(())
    }

    /// Evicts one page, least recently used first.
    /// Fails with `BufferPoolFull` if no page is safe to evict.
    pub fn evict_page(&self) -> Result<()> {
        let mut cache = self.cache.lock();
        self.evict_locked(&mut cache)
    }

    fn evict_locked(&self, cache: &mut LruCache<PageId, CachedPage>) -> Result<()> {
        let victim = cache
            .iter()
            .rev()
            .find(|(pid, page)| {
                if self.lock_manager.is_write_locked(**pid) {
                    return false;
                }
                // Skip pages someone is writing to right now
                page.try_read()
                    .map(|p| p.is_dirty().is_none())
                    .unwrap_or(false)
            })
            .map(|(pid, page)| (*pid, Arc::clone(page)));

        let Some((pid, page)) = victim else {
            warn!(resident = cache.len(), "no clean page to evict");
            return Err(QuarryError::BufferPoolFull);
        };

        // Clean, so this writes nothing
        if let Some(mut latched) = page.try_write() {
            self.write_back(&mut latched)?;
        }
        cache.pop(&pid);
        debug!(%pid, "page evicted");
        Ok(())
    }

    /// Drops a page from the cache without writing it back.
    pub fn discard_page(&self, pid: PageId) {
        if self.cache.lock().pop(&pid).is_some() {
            trace!(%pid, "page discarded");
        }
    }

    /// Releases `tid`'s lock on `pid` ahead of transaction end.
    /// Breaks strict two-phase locking; callers must know it is safe.
    pub fn release_page(&self, tid: TransactionId, pid: PageId) {
        self.lock_manager.release(tid, pid, false);
    }

    /// Returns true if `pid` is locked by any transaction.
    /// See `LockManager::holds`.
    pub fn holds_lock(&self, tid: TransactionId, pid: PageId) -> bool {
        self.lock_manager.holds(tid, pid)
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("capacity", &self.config.capacity)
            .field("resident", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::LockRetryPolicy;
    use crate::storage::heap::HeapFile;
    use crate::tuple::{DataType, Schema, TupleBuilder};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        pool: BufferPool,
        table: TableId,
        schema: Arc<Schema>,
    }

    fn setup(capacity: usize) -> Fixture {
        let dir = TempDir::new().unwrap();
        let schema: Arc<Schema> = Schema::from_types(&[DataType::Integer, DataType::Integer]).into();
        let file = HeapFile::open(dir.path().join("t.dat"), schema.clone()).unwrap();

        let catalog = Arc::new(Catalog::new());
        let table = catalog.add_table(file, "t", "");

        let config = BufferPoolConfig::with_capacity(capacity)
            .retry(LockRetryPolicy::new(3, Duration::from_millis(1)));
        Fixture {
            _dir: dir,
            pool: BufferPool::new(catalog, config),
            table,
            schema,
        }
    }

    fn pid(f: &Fixture, n: u32) -> PageId {
        PageId::new(f.table, n)
    }

    fn row(f: &Fixture, a: i32) -> Tuple {
        TupleBuilder::new(f.schema.clone()).value(a).value(a).build()
    }

    #[test]
    fn test_get_page_caches() {
        let f = setup(4);
        let tid = TransactionId::new();

        let a = f.pool.get_page(tid, pid(&f, 0), Permissions::ReadOnly).unwrap();
        let b = f.pool.get_page(tid, pid(&f, 0), Permissions::ReadOnly).unwrap();
        assert!(Arc::ptr_eq(a.shared(), b.shared()));
        assert_eq!(f.pool.len(), 1);
        assert!(f.pool.is_cached(pid(&f, 0)));
    }

    #[test]
    fn test_lru_eviction_order() {
        let f = setup(2);
        let tid = TransactionId::new();

        f.pool.get_page(tid, pid(&f, 0), Permissions::ReadOnly).unwrap();
        f.pool.get_page(tid, pid(&f, 1), Permissions::ReadOnly).unwrap();
        // Touch page 0 so page 1 becomes least recently used
        f.pool.get_page(tid, pid(&f, 0), Permissions::ReadOnly).unwrap();
        f.pool.get_page(tid, pid(&f, 2), Permissions::ReadOnly).unwrap();

        assert_eq!(f.pool.len(), 2);
        assert!(f.pool.is_cached(pid(&f, 0)));
        assert!(!f.pool.is_cached(pid(&f, 1)));
        assert!(f.pool.is_cached(pid(&f, 2)));
    }

    #[test]
    fn test_dirty_pages_are_not_evicted() {
        let f = setup(1);
        let tid = TransactionId::new();

        let mut t = row(&f, 1);
        f.pool.insert_tuple(tid, f.table, &mut t).unwrap();

        let other = TransactionId::new();
        let result = f.pool.get_page(other, pid(&f, 1), Permissions::ReadOnly);
        assert!(matches!(result, Err(QuarryError::BufferPoolFull)));
        assert!(f.pool.is_cached(pid(&f, 0)));
    }

    #[test]
    fn test_write_locked_clean_page_is_not_evicted() {
        let f = setup(1);
        let tid = TransactionId::new();

        f.pool.get_page(tid, pid(&f, 0), Permissions::ReadWrite).unwrap();
        assert!(matches!(f.pool.evict_page(), Err(QuarryError::BufferPoolFull)));

        f.pool.transaction_complete(tid, true).unwrap();
        f.pool.evict_page().unwrap();
        assert!(f.pool.is_empty());
    }

    #[test]
    fn test_lock_conflict_aborts() {
        let f = setup(4);
        let (t1, t2) = (TransactionId::new(), TransactionId::new());

        f.pool.get_page(t1, pid(&f, 0), Permissions::ReadWrite).unwrap();
        let result = f.pool.get_page(t2, pid(&f, 0), Permissions::ReadOnly);
        assert!(matches!(result, Err(QuarryError::TransactionAborted(t)) if t == t2));
    }

    #[test]
    fn test_read_only_handle_from_pool() {
        let f = setup(4);
        let tid = TransactionId::new();

        let h = f.pool.get_page(tid, pid(&f, 0), Permissions::ReadOnly).unwrap();
        assert_eq!(h.permissions(), Permissions::ReadOnly);
        assert!(matches!(h.write(), Err(QuarryError::ReadOnlyPage(_))));
    }

    #[test]
    fn test_insert_marks_dirty_and_commit_cleans() {
        let f = setup(4);
        let tid = TransactionId::new();

        let mut t = row(&f, 5);
        f.pool.insert_tuple(tid, f.table, &mut t).unwrap();
        let rid = t.record_id().unwrap();
        assert_eq!(rid.page_id, pid(&f, 0));

        let h = f.pool.get_page(tid, rid.page_id, Permissions::ReadOnly).unwrap();
        assert_eq!(h.read().is_dirty(), Some(tid));
        drop(h);

        f.pool.transaction_complete(tid, true).unwrap();
        let tid2 = TransactionId::new();
        let h = f.pool.get_page(tid2, rid.page_id, Permissions::ReadOnly).unwrap();
        assert_eq!(h.read().is_dirty(), None);
        assert!(f.pool.lock_manager().pages_locked_by(tid).is_empty());
    }

    #[test]
    fn test_abort_restores_page() {
        let f = setup(4);
        let tid = TransactionId::new();

        let mut t = row(&f, 5);
        f.pool.insert_tuple(tid, f.table, &mut t).unwrap();
        let handle = f
            .pool
            .get_page(tid, t.record_id().unwrap().page_id, Permissions::ReadOnly)
            .unwrap();

        f.pool.transaction_complete(tid, false).unwrap();

        // The outstanding handle sees the rolled back page
        assert_eq!(handle.read().tuples().count(), 0);
        assert_eq!(handle.read().is_dirty(), None);
    }

    #[test]
    fn test_delete_requires_record_id() {
        let f = setup(4);
        let tid = TransactionId::new();
        let t = row(&f, 1);
        assert!(matches!(
            f.pool.delete_tuple(tid, &t),
            Err(QuarryError::MissingRecordId)
        ));
    }

    #[test]
    fn test_discard_drops_without_flush() {
        let f = setup(4);
        let tid = TransactionId::new();

        let mut t = row(&f, 1);
        f.pool.insert_tuple(tid, f.table, &mut t).unwrap();
        f.pool.discard_page(pid(&f, 0));
        assert!(!f.pool.is_cached(pid(&f, 0)));

        // The appended page is on disk but empty
        let file = f.pool.catalog().heap_file(f.table).unwrap();
        assert_eq!(file.read_page(pid(&f, 0)).unwrap().tuples().count(), 0);
    }

    #[test]
    fn test_failed_commit_drops_page() {
        let f = setup(4);
        let tid = TransactionId::new();

        let mut t = row(&f, 3);
        f.pool.insert_tuple(tid, f.table, &mut t).unwrap();
        assert!(f.pool.is_cached(pid(&f, 0)));

        // With the table gone the commit flush has nowhere to go
        f.pool.catalog().clear();
        assert!(matches!(
            f.pool.transaction_complete(tid, true),
            Err(QuarryError::TableNotFound(_))
        ));
        assert!(!f.pool.is_cached(pid(&f, 0)));
        assert_eq!(f.pool.len(), 0);
        assert!(f.pool.lock_manager().pages_locked_by(tid).is_empty());
        assert!(!f.pool.lock_manager().is_write_locked(pid(&f, 0)));

        // Nothing dirty is left behind for a later flush to pick up
        f.pool.flush_all_pages().unwrap();
    }

    #[test]
    fn test_flush_all_pages() {
        let f = setup(4);
        let tid = TransactionId::new();

        let mut t = row(&f, 9);
        f.pool.insert_tuple(tid, f.table, &mut t).unwrap();
        f.pool.flush_all_pages().unwrap();

        let file = f.pool.catalog().heap_file(f.table).unwrap();
        let on_disk = file.read_page(pid(&f, 0)).unwrap();
        assert_eq!(on_disk.tuples().next(), Some(&t));
    }

    #[test]
    fn test_unknown_table() {
        let f = setup(4);
        let tid = TransactionId::new();
        let bogus = PageId::new(TableId::new(f.table.as_u32().wrapping_add(1)), 0);
        assert!(matches!(
            f.pool.get_page(tid, bogus, Permissions::ReadOnly),
            Err(QuarryError::TableNotFound(_))
        ));
    }
}
