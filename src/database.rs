use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::buffer::BufferPool;
use crate::catalog::Catalog;
use crate::common::{BufferPoolConfig, TransactionId};

/// Database bundles the catalog and the buffer pool that every operation is
/// run against. Construct one and pass it down explicitly.
pub struct Database {
    catalog: Arc<Catalog>,
    config: BufferPoolConfig,
    buffer_pool: RwLock<Arc<BufferPool>>,
}

impl Database {
    pub fn new(config: BufferPoolConfig) -> Self {
        let catalog = Arc::new(Catalog::new());
        let buffer_pool = Arc::new(BufferPool::new(Arc::clone(&catalog), config));
        Self {
            catalog,
            config,
            buffer_pool: RwLock::new(buffer_pool),
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Returns the current buffer pool.
    pub fn buffer_pool(&self) -> Arc<BufferPool> {
        self.buffer_pool.read().clone()
    }

    /// Replaces the buffer pool with an empty one, dropping every cached
    /// page and every lock without writing anything back. Pools handed out
    /// earlier keep working but are no longer shared with new callers.
    pub fn reset_buffer_pool(&self) -> Arc<BufferPool> {
        let fresh = Arc::new(BufferPool::new(Arc::clone(&self.catalog), self.config));
        *self.buffer_pool.write() = Arc::clone(&fresh);
        debug!(capacity = self.config.capacity, "buffer pool reset");
        fresh
    }

    /// Starts a new transaction.
    pub fn begin(&self) -> TransactionId {
        TransactionId::new()
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new(BufferPoolConfig::default())
    }
}
