use std::collections::hash_map::DefaultHasher;
use std::fs::{File, OpenOptions};
use std::hash::{Hash, Hasher};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::buffer::{BufferPool, PageHandle};
use crate::common::{
    PageId, Permissions, QuarryError, Result, TableId, TransactionId, PAGE_SIZE,
};
use crate::storage::page::{HeapPage, Page};
use crate::tuple::{Schema, Tuple};

use super::HeapFileIterator;

/// HeapFile stores one table's tuples in no particular order, as a flat
/// sequence of PAGE_SIZE pages: page `n` lives at byte offset `n * PAGE_SIZE`.
///
/// Pages are never deallocated, so the page count only grows. All tuple-level
/// access goes through the buffer pool; `read_page`/`write_page` are the raw
/// I/O used by the pool itself.
pub struct HeapFile {
    /// The backing file
    file: Mutex<File>,
    /// Path to the backing file
    path: PathBuf,
    /// Identity derived from the absolute path
    table_id: TableId,
    /// Schema of every tuple in this table
    schema: Arc<Schema>,
    /// Serializes page appends so two inserters never claim the same page number
    append_latch: Mutex<()>,
    /// Number of page reads performed
    num_reads: AtomicU32,
    /// Number of page writes performed
    num_writes: AtomicU32,
}

impl HeapFile {
    /// Opens the heap file at `path`, creating it if it doesn't exist.
    /// Existing contents are kept.
    pub fn open<P: AsRef<Path>>(path: P, schema: Arc<Schema>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let path = path
            .as_ref()
            .canonicalize()
            .unwrap_or_else(|_| path.as_ref().to_path_buf());
        let table_id = Self::table_id_for(&path);

        Ok(Self {
            file: Mutex::new(file),
            path,
            table_id,
            schema,
            append_latch: Mutex::new(()),
            num_reads: AtomicU32::new(0),
            num_writes: AtomicU32::new(0),
        })
    }

    fn table_id_for(path: &Path) -> TableId {
        let mut hasher = DefaultHasher::new();
        path.hash(&mut hasher);
        let h = hasher.finish();
        TableId::new((h ^ (h >> 32)) as u32)
    }

    /// Returns the id of the table stored in this file.
    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    /// Returns the schema of the table stored in this file.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Returns the path to the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of pages, derived from the current file length.
    pub fn num_pages(&self) -> Result<u32> {
        let len = self.file.lock().metadata()?.len();
        Ok(len.div_ceil(PAGE_SIZE as u64) as u32)
    }

    /// Reads a page from disk.
    /// Reading past the end of the file yields an empty page.
    pub fn read_page(&self, pid: PageId) -> Result<HeapPage> {
        self.check_table(pid)?;

        let mut data = vec![0u8; PAGE_SIZE];
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(pid.offset()))?;

            let mut filled = 0;
            while filled < PAGE_SIZE {
                let n = file.read(&mut data[filled..])?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
        }

        self.num_reads.fetch_add(1, Ordering::Relaxed);
        HeapPage::new(pid, &data, self.schema.clone())
    }

    /// Writes a page at its offset, extending the file if needed.
    pub fn write_page<P: Page>(&self, page: &P) -> Result<()> {
        let pid = page.id();
        self.check_table(pid)?;

        let data = page.page_data();
        if data.len() != PAGE_SIZE {
            return Err(QuarryError::CorruptedPage(pid));
        }

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(pid.offset()))?;
        file.write_all(&data)?;
        file.flush()?;

        self.num_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn check_table(&self, pid: PageId) -> Result<()> {
        if pid.table_id != self.table_id {
            return Err(QuarryError::TableMismatch {
                page: pid,
                table: self.table_id,
            });
        }
        Ok(())
    }

    /// Inserts a tuple into the first page with a free slot, appending a new
    /// page when every existing page is full. Returns the pages it modified.
    pub fn insert_tuple(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        tuple: &mut Tuple,
    ) -> Result<Vec<PageHandle>> {
        if **tuple.schema() != *self.schema {
            return Err(QuarryError::SchemaMismatch);
        }
        // Reject what no page could hold before anything is appended
        if HeapPage::slots_per_page(&self.schema) == 0 {
            return Err(QuarryError::TupleTooWide(self.schema.tuple_size()));
        }
        if tuple.to_bytes().is_none() {
            return Err(QuarryError::ValueEncoding(self.schema.to_string()));
        }

        for page_no in 0..self.num_pages()? {
            let pid = PageId::new(self.table_id, page_no);
            let held_before = pool.lock_manager().lock_mode(tid, pid).is_some();

            let check = pool.get_page(tid, pid, Permissions::ReadOnly)?;
            let has_room = check.read().num_empty_slots() > 0;
            drop(check);

            if !has_room {
                // Drop the shared lock taken for the check unless the
                // transaction already held this page before the scan got here.
                if !held_before {
                    pool.lock_manager().release(tid, pid, true);
                }
                continue;
            }

            let handle = pool.get_page(tid, pid, Permissions::ReadWrite)?;
            handle.write()?.insert_tuple(tuple)?;
            return Ok(vec![handle]);
        }

        let pid = {
            let _latch = self.append_latch.lock();
            let pid = PageId::new(self.table_id, self.num_pages()?);
            self.write_page(&HeapPage::empty(pid, self.schema.clone()))?;
            pid
        };
        debug!(%pid, "heap file grew by one page");

        let handle = pool.get_page(tid, pid, Permissions::ReadWrite)?;
        handle.write()?.insert_tuple(tuple)?;
        Ok(vec![handle])
    }

    /// Removes the tuple from the page named by its record id.
    pub fn delete_tuple(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        tuple: &Tuple,
    ) -> Result<PageHandle> {
        let rid = tuple.record_id().ok_or(QuarryError::MissingRecordId)?;
        self.check_table(rid.page_id)?;

        let handle = pool.get_page(tid, rid.page_id, Permissions::ReadWrite)?;
        handle.write()?.delete_tuple(tuple)?;
        Ok(handle)
    }

    /// Returns an iterator over every tuple in the file, in page order.
    /// The iterator must be opened before use.
    pub fn iterator<'a>(&'a self, pool: &'a BufferPool, tid: TransactionId) -> HeapFileIterator<'a> {
        HeapFileIterator::new(self, pool, tid)
    }

    /// Returns the number of page reads performed.
    pub fn get_num_reads(&self) -> u32 {
        self.num_reads.load(Ordering::Relaxed)
    }

    /// Returns the number of page writes performed.
    pub fn get_num_writes(&self) -> u32 {
        self.num_writes.load(Ordering::Relaxed)
    }
}

impl Drop for HeapFile {
    fn drop(&mut self) {
        let file = self.file.get_mut();
        let _ = file.sync_all();
    }
}

impl std::fmt::Debug for HeapFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapFile")
            .field("path", &self.path)
            .field("table_id", &self.table_id)
            .finish()
    }
}
