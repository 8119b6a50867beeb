mod buffer_pool;
mod page_handle;

pub use buffer_pool::*;
pub use page_handle::*;
