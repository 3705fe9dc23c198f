//! Vellum - the storage core of a disk-oriented RDBMS
//!
//! This crate provides the caching and indexing layer of a relational
//! database: pages live on persistent storage and a fixed-size buffer pool
//! caches the working set in memory, while a disk-backed B+ tree provides a
//! unique-key index on top.
//!
//! # Architecture
//!
//! - **Storage Layer** (`storage`): raw disk I/O
//!   - `DiskManager`: reads and writes fixed-size pages in a database file
//!   - `DiskScheduler`: funnels disk requests through a worker thread
//!
//! - **Buffer Pool** (`buffer`): memory management for database pages
//!   - `BufferPoolManager`: caches pages in a fixed set of frames
//!   - `LruKReplacer`: LRU-K eviction policy
//!   - `Frame`: per-frame metadata, payload, and reader-writer latch
//!   - `BasicPageGuard`/`ReadPageGuard`/`WritePageGuard`: RAII pin (and
//!     latch) management for safe page access
//!
//! - **Index** (`index`): a concurrent B+ tree over buffer pool pages
//!   - `BPlusTree`: search, insert with splits, remove with
//!     borrow-or-merge, all via latch crabbing
//!   - `IndexIterator`: forward scan across the leaf chain
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vellum::buffer::BufferPoolManager;
//! use vellum::index::{BPlusTree, U32Comparator};
//! use vellum::storage::disk::DiskManager;
//! use vellum::{RecordId, PageId, SlotId};
//!
//! let disk_manager = Arc::new(DiskManager::new("test.db").unwrap());
//! let bpm = Arc::new(BufferPoolManager::new(64, 2, disk_manager));
//!
//! // The index lives under a fixed header page.
//! let header_page_id = bpm.new_page().unwrap();
//! bpm.unpin_page(header_page_id, true, Default::default());
//!
//! let tree: BPlusTree<u32, RecordId, U32Comparator> = BPlusTree::new(
//!     "pk_index", header_page_id, bpm, U32Comparator, 64, 64,
//! ).unwrap();
//!
//! tree.insert(&42, &RecordId::new(PageId::new(7), SlotId::new(0))).unwrap();
//! assert!(tree.get_value(&42).unwrap().is_some());
//! ```

pub mod buffer;
pub mod common;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{PageId, RecordId, Result, SlotId, VellumError};
