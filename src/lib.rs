//! Strata - the paged storage core of a disk-oriented database
//!
//! This crate provides a fixed-capacity page cache over a single database file
//! and a disk-resident B+Tree index built on top of it. Every index node lives
//! in a buffer pool page; nothing above the buffer pool touches the disk.
//!
//! # Architecture
//!
//! The system is organized into several layers:
//!
//! - **Storage Layer** (`storage`): Handles disk I/O and page layouts
//!   - `DiskManager`: Reads and writes pages to/from disk
//!   - `DiskScheduler`: Background worker serving disk requests in order
//!   - `BPlusTreeNode`: Binary layout of B+Tree leaf and internal nodes
//!   - `HeaderPage`: Index name to root page table stored in page 0
//!
//! - **Containers** (`container`): In-memory data structures
//!   - `ExtendibleHashTable`: Growable hash directory used as the page table
//!
//! - **Buffer Pool** (`buffer`): Memory management for database pages
//!   - `BufferPoolManager`: Fetches pages from disk and caches them in memory
//!   - `LruKReplacer`: LRU-K page replacement policy
//!   - `FrameHeader`: Per-frame metadata and data storage
//!   - `ReadPageGuard`/`WritePageGuard`: RAII guards that unpin on drop
//!
//! - **Index** (`index`): `BPlusTree` with unique keys and `IndexIterator`
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use strata::buffer::BufferPoolManager;
//! use strata::common::RecordId;
//! use strata::index::{BPlusTree, OrdComparator};
//! use strata::storage::disk::DiskManager;
//!
//! # fn main() -> strata::Result<()> {
//! let disk_manager = Arc::new(DiskManager::new("test.db")?);
//!
//! // A buffer pool with 64 frames and LRU-2 replacement
//! let bpm = Arc::new(BufferPoolManager::new(64, 2, disk_manager));
//!
//! let mut tree: BPlusTree<i64, RecordId, _> =
//!     BPlusTree::with_default_sizes("orders_pk", Arc::clone(&bpm), OrdComparator)?;
//! tree.insert(42, RecordId::from_i64(42))?;
//! assert_eq!(tree.search(&42)?, Some(RecordId::from_i64(42)));
//!
//! // Persist everything, including the header page that records the root
//! bpm.flush_all_pages()?;
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod common;
pub mod container;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{PageId, RecordId, Result, SlotId, StrataError};
