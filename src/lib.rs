//! Quarry - a page-cached heap storage engine with strict two-phase locking
//!
//! Tables are stored as heap files of fixed-size pages. Every page access
//! goes through a bounded buffer pool, which takes page-level shared or
//! exclusive locks on behalf of a transaction and holds them until the
//! transaction commits or aborts.
//!
//! # Architecture
//!
//! - **Storage** (`storage`): on-disk layout
//!   - `HeapFile`: one table's pages in a flat file, tuple insert/delete and scans
//!   - `HeapPage`: header bitmap plus fixed-width tuple slots
//!
//! - **Concurrency** (`concurrency`): `LockManager`, per-page shared/exclusive
//!   locks with upgrade and an audit event stream
//!
//! - **Buffer Pool** (`buffer`): LRU page cache, NO-STEAL eviction, lock
//!   retry with random backoff, commit/abort reconciliation
//!
//! - **Catalog** (`catalog`): table ids and names to heap files and schemas
//!
//! - **Tuples** (`tuple`): fixed-width `int`/`string` values, schemas and tuples
//!
//! # Example
//!
//! ```rust,no_run
//! use quarry::catalog::Catalog;
//! use quarry::storage::heap::{DbFileIterator, HeapFile};
//! use quarry::tuple::{DataType, Schema, TupleBuilder};
//! use quarry::{BufferPoolConfig, Database};
//!
//! let db = Database::new(BufferPoolConfig::default());
//! let schema = Schema::builder()
//!     .column("id", DataType::Integer)
//!     .column("name", DataType::String(32))
//!     .build_arc();
//!
//! let file = HeapFile::open("users.dat", schema.clone()).unwrap();
//! let table = db.catalog().add_table(file, "users", "id");
//! let pool = db.buffer_pool();
//!
//! let tid = db.begin();
//! let mut row = TupleBuilder::new(schema).value(1).value("ada").build();
//! pool.insert_tuple(tid, table, &mut row).unwrap();
//! pool.transaction_complete(tid, true).unwrap();
//!
//! let tid = db.begin();
//! let file = db.catalog().heap_file(table).unwrap();
//! let mut scan = file.iterator(&pool, tid);
//! scan.open().unwrap();
//! while scan.has_next().unwrap() {
//!     println!("{}", scan.next().unwrap());
//! }
//! pool.transaction_complete(tid, true).unwrap();
//! ```

pub mod buffer;
pub mod catalog;
pub mod common;
pub mod concurrency;
pub mod database;
pub mod storage;
pub mod tuple;

// Re-export commonly used types at the crate root
pub use common::{
    BufferPoolConfig, LockRetryPolicy, PageId, Permissions, QuarryError, RecordId, Result,
    TableId, TransactionId, PAGE_SIZE,
};
pub use database::Database;
