mod heap_file;
mod heap_file_iterator;

pub use heap_file::HeapFile;
pub use heap_file_iterator::{DbFileIterator, HeapFileIterator};
