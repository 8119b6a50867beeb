mod heap_page;

pub use heap_page::HeapPage;

use crate::common::{PageId, Result, TransactionId};

/// Capabilities every cached page offers the buffer pool.
pub trait Page: Sized {
    /// Returns the identity of this page.
    fn id(&self) -> PageId;

    /// Serializes the page to exactly PAGE_SIZE bytes.
    fn page_data(&self) -> Vec<u8>;

    /// Returns the transaction that dirtied this page, or None if it is clean.
    fn is_dirty(&self) -> Option<TransactionId>;

    /// Marks the page dirty on behalf of `tid`, or clean when `tid` is None.
    fn mark_dirty(&mut self, tid: Option<TransactionId>);

    /// Returns the page as it was at fault-in time or at the last commit.
    fn before_image(&self) -> Result<Self>;

    /// Records the current contents as the new before-image.
    fn set_before_image(&mut self);
}
