use thiserror::Error;

use super::types::{PageId, RecordId, TableId, TransactionId};

/// Storage engine error types
#[derive(Error, Debug)]
pub enum QuarryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transaction {0} aborted: lock not granted within the retry budget")]
    TransactionAborted(TransactionId),

    #[error("Table {0} not found")]
    TableNotFound(TableId),

    #[error("No table named '{0}'")]
    TableNameNotFound(String),

    #[error("No such element")]
    NoSuchElement,

    #[error("Buffer pool is full, every cached page is dirty or write-locked")]
    BufferPoolFull,

    #[error("{page} does not belong to table {table}")]
    TableMismatch { page: PageId, table: TableId },

    #[error("{0} has no free slot")]
    PageFull(PageId),

    #[error("Tuples of {0} bytes do not fit in a page")]
    TupleTooWide(usize),

    #[error("Invalid slot {slot} on {page}")]
    InvalidSlot { page: PageId, slot: u16 },

    #[error("Slot {} on {} is empty", .0.slot, .0.page_id)]
    EmptySlot(RecordId),

    #[error("{0} holds bytes that do not decode under the table schema")]
    CorruptedPage(PageId),

    #[error("Tuple has no record id")]
    MissingRecordId,

    #[error("Tuple at {record} is not stored on {page}")]
    TupleNotOnPage { record: RecordId, page: PageId },

    #[error("Tuple schema does not match the table schema")]
    SchemaMismatch,

    #[error("Value cannot be encoded as {0}")]
    ValueEncoding(String),

    #[error("{0} was fetched read-only")]
    ReadOnlyPage(PageId),

    #[error("Invalid catalog entry at line {line}: {reason}")]
    InvalidCatalog { line: usize, reason: String },
}

pub type Result<T> = std::result::Result<T, QuarryError>;
