use super::types::PageId;

/// Size of a page in bytes (4 KB)
pub const PAGE_SIZE: usize = 4096;

/// Invalid page ID constant
pub const INVALID_PAGE_ID: PageId = PageId(u32::MAX);

/// Page reserved for the index name -> root page table
pub const HEADER_PAGE_ID: PageId = PageId(0);

/// Default K value for LRU-K replacement policy
pub const DEFAULT_LRUK_K: usize = 2;

/// Default buffer pool size (number of frames)
pub const DEFAULT_BUFFER_POOL_SIZE: usize = 64;

/// Default bucket capacity of the page table directory
pub const DEFAULT_BUCKET_SIZE: usize = 8;

/// Maximum number of in-flight requests queued on the disk scheduler
pub const DISK_SCHEDULER_QUEUE_DEPTH: usize = 128;

/// Maximum length of an index name stored in the header page
pub const MAX_INDEX_NAME_LEN: usize = 32;
