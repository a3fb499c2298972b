use std::sync::Arc;

use strata::buffer::BufferPoolManager;
use strata::common::logger::init_logger;
use strata::common::{RecordId, DEFAULT_BUFFER_POOL_SIZE, DEFAULT_LRUK_K};
use strata::index::{BPlusTree, OrdComparator};
use strata::storage::disk::DiskManager;

/// Usage: strata [DB_FILE] [KEYS_FILE]
///
/// Opens (or creates) the `demo_index` B+Tree in DB_FILE, loads the integer
/// keys from KEYS_FILE if one is given, and prints the tree.
fn main() -> strata::Result<()> {
    init_logger();

    let mut args = std::env::args().skip(1);
    let db_path = args.next().unwrap_or_else(|| "strata_demo.db".to_string());
    let keys_path = args.next();

    println!("Strata - paged storage core");
    println!("===========================\n");

    let disk_manager = Arc::new(DiskManager::new(&db_path)?);
    let bpm = Arc::new(BufferPoolManager::new(
        DEFAULT_BUFFER_POOL_SIZE,
        DEFAULT_LRUK_K,
        Arc::clone(&disk_manager),
    ));
    println!(
        "Opened {db_path}: {} page(s), {DEFAULT_BUFFER_POOL_SIZE} frames, LRU-{DEFAULT_LRUK_K}",
        disk_manager.get_num_pages()
    );

    // Small nodes so a handful of keys already gives a multi-level tree
    let mut tree: BPlusTree<i64, RecordId, _> =
        BPlusTree::new("demo_index", Arc::clone(&bpm), OrdComparator, 4, 4)?;

    match keys_path {
        Some(path) => {
            let inserted = tree.insert_from_file(&path)?;
            println!("Inserted {inserted} new key(s) from {path}");
        }
        None if tree.is_empty() => {
            for key in [42, 7, 19, 3, 88, 61, 25, 14, 70, 5, 33] {
                tree.insert(key, RecordId::from_i64(key))?;
            }
            println!("Inserted sample keys");
        }
        None => println!("Index already holds data, leaving it as is"),
    }

    tree.check_integrity()?;

    println!("\nTree:\n{}", tree.dump()?);

    let keys = tree
        .begin()?
        .map(|entry| entry.map(|(key, _)| key.to_string()))
        .collect::<strata::Result<Vec<_>>>()?;
    println!("In order: {}", keys.join(" "));

    if let Some(rid) = tree.search(&19)? {
        println!("search(19) -> {rid}");
    }

    bpm.flush_all_pages()?;
    disk_manager.sync()?;
    log::info!(
        "flushed; {} reads and {} writes this run",
        disk_manager.get_num_reads(),
        disk_manager.get_num_writes()
    );

    Ok(())
}
