use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::common::{PageId, Permissions, QuarryError, Result};
use crate::storage::page::HeapPage;

/// Shared reference to a cached page, returned by `BufferPool::get_page`.
///
/// The handle carries the permission its lock was granted with. Reading is
/// always allowed; `write` only succeeds for handles obtained with
/// `Permissions::ReadWrite`, so a page can't be mutated without the
/// exclusive lock.
///
/// Dropping a handle does not release the page lock. Locks live until the
/// transaction completes.
#[derive(Clone)]
pub struct PageHandle {
    /// The page ID being referenced
    pid: PageId,
    /// The cached page instance shared with the pool
    page: Arc<RwLock<HeapPage>>,
    /// Permission the page lock was granted with
    perm: Permissions,
}

impl PageHandle {
    pub(crate) fn new(pid: PageId, page: Arc<RwLock<HeapPage>>, perm: Permissions) -> Self {
        Self { pid, page, perm }
    }

    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.pid
    }

    /// Returns the permission this handle was obtained with.
    pub fn permissions(&self) -> Permissions {
        self.perm
    }

    /// Latches the page for reading.
    pub fn read(&self) -> RwLockReadGuard<'_, HeapPage> {
        self.page.read()
    }

    /// Latches the page for writing.
    /// Fails with `ReadOnlyPage` if the handle only carries a shared lock.
    pub fn write(&self) -> Result<RwLockWriteGuard<'_, HeapPage>> {
        match self.perm {
            Permissions::ReadWrite => Ok(self.page.write()),
            Permissions::ReadOnly => Err(QuarryError::ReadOnlyPage(self.pid)),
        }
    }

    pub(crate) fn shared(&self) -> &Arc<RwLock<HeapPage>> {
        &self.page
    }
}

impl std::fmt::Debug for PageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageHandle")
            .field("pid", &self.pid)
            .field("perm", &self.perm)
            .finish()
    }
}
