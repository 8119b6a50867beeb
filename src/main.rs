use std::time::Duration;

use quarry::storage::heap::DbFileIterator;
use quarry::tuple::TupleBuilder;
use quarry::{BufferPoolConfig, Database, LockRetryPolicy, PageId, Permissions, TableId};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("Quarry - a page-cached heap storage engine");
    println!("==========================================\n");

    // Scratch directory holding the catalog and table files
    let dir = std::env::temp_dir().join(format!("quarry-demo-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("Failed to create demo directory");
    let catalog_path = dir.join("catalog.txt");
    std::fs::write(&catalog_path, "accounts (id int pk, owner string, balance int)\n")
        .expect("Failed to write catalog file");

    let config = BufferPoolConfig::with_capacity(16)
        .retry(LockRetryPolicy::new(5, Duration::from_millis(5)));
    let db = Database::new(config);
    let tables = db
        .catalog()
        .load_schema(&catalog_path)
        .expect("Failed to load catalog");
    let table = tables[0];
    let schema = db.catalog().schema(table).expect("Table not found");
    println!("Loaded table 'accounts' ({}) with schema {}\n", table, schema);

    // A committed transaction
    let pool = db.buffer_pool();
    let t1 = db.begin();
    for (id, owner, balance) in [(1, "ada", 120), (2, "grace", 75), (3, "linus", 40)] {
        let mut row = TupleBuilder::new(schema.clone())
            .value(id)
            .value(owner)
            .value(balance)
            .build();
        pool.insert_tuple(t1, table, &mut row)
            .expect("Failed to insert tuple");
        println!("{} inserted {:?}", t1, row.record_id());
    }
    pool.transaction_complete(t1, true).expect("Commit failed");
    println!("{} committed\n", t1);

    // An aborted transaction leaves no trace
    let t2 = db.begin();
    let mut ghost = TupleBuilder::new(schema.clone())
        .value(99)
        .value("mallory")
        .value(1_000_000)
        .build();
    pool.insert_tuple(t2, table, &mut ghost)
        .expect("Failed to insert tuple");
    pool.transaction_complete(t2, false).expect("Abort failed");
    println!("{} aborted\n", t2);

    // Two writers on one page: the second one gives up
    let t3 = db.begin();
    let t4 = db.begin();
    let page = PageId::new(table, 0);
    pool.get_page(t3, page, Permissions::ReadWrite)
        .expect("Failed to lock page");
    match pool.get_page(t4, page, Permissions::ReadWrite) {
        Ok(_) => println!("{} unexpectedly got {}", t4, page),
        Err(e) => println!("{} could not lock {}: {}", t4, page, e),
    }
    pool.transaction_complete(t4, false).expect("Abort failed");
    pool.transaction_complete(t3, true).expect("Commit failed");

    // Simulate a restart and scan what reached disk
    let pool = db.reset_buffer_pool();
    scan(&db, table, &pool);

    std::fs::remove_dir_all(&dir).ok();
    println!("\nDemo completed successfully!");
}

fn scan(db: &Database, table: TableId, pool: &quarry::buffer::BufferPool) {
    let tid = db.begin();
    let file = db.catalog().heap_file(table).expect("Table not found");
    let mut it = file.iterator(pool, tid);
    it.open().expect("Failed to open scan");

    println!("\nContents of {} after restart:", file.path().display());
    while it.has_next().expect("Scan failed") {
        let tuple = it.next().expect("Scan failed");
        println!("  {}", tuple);
    }
    it.close();
    pool.transaction_complete(tid, true).expect("Commit failed");
}
