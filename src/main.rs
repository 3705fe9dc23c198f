use std::sync::Arc;

use vellum::buffer::{AccessType, BufferPoolManager};
use vellum::index::{BPlusTree, U32Comparator};
use vellum::storage::disk::DiskManager;
use vellum::{PageId, RecordId, SlotId};

fn main() {
    println!("Vellum - a disk-oriented storage core in Rust");
    println!("=============================================\n");

    let db_path = "demo.db";

    let disk_manager = Arc::new(DiskManager::new(db_path).expect("Failed to create disk manager"));
    println!("Created disk manager for: {}", db_path);

    // Buffer pool with 16 frames and LRU-2 replacement
    let bpm = Arc::new(BufferPoolManager::new(16, 2, disk_manager));
    println!("Created buffer pool manager with 16 frames\n");

    // The index stores its root id in a dedicated header page.
    let header_page_id = bpm.new_page().expect("Failed to allocate header page");
    bpm.unpin_page(header_page_id, true, AccessType::Unknown);

    let tree: BPlusTree<u32, RecordId, U32Comparator> = BPlusTree::new(
        "demo_index",
        header_page_id,
        Arc::clone(&bpm),
        U32Comparator,
        4,
        4,
    )
    .expect("Failed to create index");

    for key in [5u32, 3, 8, 1, 9, 2, 7, 4, 6] {
        let value = RecordId::new(PageId::new(100 + key), SlotId::new(0));
        tree.insert(&key, &value).expect("Failed to insert");
        println!("Inserted key {key}");
    }

    println!("\nPoint lookups:");
    for key in [1u32, 5, 9] {
        let value = tree.get_value(&key).expect("Lookup failed");
        println!("  get_value({key}) = {value:?}");
    }

    println!("\nOrdered scan:");
    for entry in tree.begin().expect("Failed to build iterator") {
        let (key, value) = entry.expect("Scan failed");
        println!("  {key} -> {value:?}");
    }

    tree.remove(&5).expect("Failed to remove");
    println!("\nRemoved key 5; get_value(5) = {:?}", tree.get_value(&5).unwrap());

    bpm.flush_all_pages().expect("Failed to flush");
    println!("Flushed all pages to disk");

    std::fs::remove_file(db_path).ok();
    println!("\nDemo completed successfully!");
}
