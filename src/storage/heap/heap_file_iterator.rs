use std::collections::VecDeque;

use crate::buffer::BufferPool;
use crate::common::{PageId, Permissions, QuarryError, Result, TransactionId};
use crate::tuple::Tuple;

use super::HeapFile;

/// Restartable, forward-only tuple stream consumed by relational operators.
pub trait DbFileIterator {
    /// Positions the iterator before the first tuple.
    fn open(&mut self) -> Result<()>;

    /// Returns whether another tuple is available. A closed iterator has none.
    fn has_next(&mut self) -> Result<bool>;

    /// Returns the next tuple, or `NoSuchElement` when the stream is exhausted.
    fn next(&mut self) -> Result<Tuple>;

    /// Restarts the stream from the beginning.
    fn rewind(&mut self) -> Result<()>;

    /// Releases the iterator's buffered state.
    fn close(&mut self);
}

/// Scans a heap file page by page through the buffer pool, taking a shared
/// lock on each page as it is reached.
///
/// The page count is captured by `open`, so pages appended afterwards are
/// only seen after a `rewind`.
pub struct HeapFileIterator<'a> {
    file: &'a HeapFile,
    pool: &'a BufferPool,
    tid: TransactionId,
    is_open: bool,
    /// Page count snapshot taken at open
    max_pages: u32,
    /// Next page number to fault in
    next_page: u32,
    /// Tuples of the current page not yet returned
    buffered: VecDeque<Tuple>,
}

impl<'a> HeapFileIterator<'a> {
    pub(super) fn new(file: &'a HeapFile, pool: &'a BufferPool, tid: TransactionId) -> Self {
        Self {
            file,
            pool,
            tid,
            is_open: false,
            max_pages: 0,
            next_page: 0,
            buffered: VecDeque::new(),
        }
    }

    /// Faults in the next page and copies its tuples out.
    fn load_next_page(&mut self) -> Result<()> {
        let pid = PageId::new(self.file.table_id(), self.next_page);
        let handle = self.pool.get_page(self.tid, pid, Permissions::ReadOnly)?;
        self.buffered.extend(handle.read().tuples().cloned());
        self.next_page += 1;
        Ok(())
    }
}

impl DbFileIterator for HeapFileIterator<'_> {
    fn open(&mut self) -> Result<()> {
        self.buffered.clear();
        self.max_pages = self.file.num_pages()?;
        self.next_page = 0;
        self.is_open = true;
        if self.max_pages > 0 {
            self.load_next_page()?;
        }
        Ok(())
    }

    fn has_next(&mut self) -> Result<bool> {
        if !self.is_open {
            return Ok(false);
        }
        while self.buffered.is_empty() {
            if self.next_page >= self.max_pages {
                return Ok(false);
            }
            self.load_next_page()?;
        }
        Ok(true)
    }

    fn next(&mut self) -> Result<Tuple> {
        if !self.has_next()? {
            return Err(QuarryError::NoSuchElement);
        }
        self.buffered.pop_front().ok_or(QuarryError::NoSuchElement)
    }

    fn rewind(&mut self) -> Result<()> {
        self.close();
        self.open()
    }

    fn close(&mut self) {
        self.is_open = false;
        self.buffered.clear();
    }
}
