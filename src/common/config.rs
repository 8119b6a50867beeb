use std::time::Duration;

/// Size of a page in bytes (4 KB)
pub const PAGE_SIZE: usize = 4096;

/// Default buffer pool capacity (number of cached pages)
pub const DEFAULT_BUFFER_POOL_PAGES: usize = 50;

/// Default number of attempts `BufferPool::get_page` makes before aborting
pub const DEFAULT_LOCK_ATTEMPTS: u32 = 30;

/// Default upper bound of the random sleep between lock attempts
pub const DEFAULT_LOCK_BACKOFF_MS: u64 = 33;

/// Width of the payload of a `string` column declared in a catalog file
pub const STRING_LEN: u16 = 128;

/// How hard the buffer pool tries to obtain a page lock before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRetryPolicy {
    /// Number of lock attempts, including the first one
    pub max_attempts: u32,
    /// Each failed attempt sleeps a uniformly random duration in `[0, max_backoff]`
    pub max_backoff: Duration,
}

impl LockRetryPolicy {
    pub fn new(max_attempts: u32, max_backoff: Duration) -> Self {
        Self {
            max_attempts,
            max_backoff,
        }
    }
}

impl Default for LockRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_LOCK_ATTEMPTS,
            max_backoff: Duration::from_millis(DEFAULT_LOCK_BACKOFF_MS),
        }
    }
}

/// Tunables of the buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPoolConfig {
    /// Maximum number of pages held in memory
    pub capacity: usize,
    /// Lock acquisition retry budget
    pub retry: LockRetryPolicy,
}

impl BufferPoolConfig {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    pub fn retry(mut self, retry: LockRetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_BUFFER_POOL_PAGES,
            retry: LockRetryPolicy::default(),
        }
    }
}
