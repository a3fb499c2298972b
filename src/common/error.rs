use thiserror::Error;

use super::types::PageId;

/// Storage core error types
#[derive(Error, Debug)]
pub enum StrataError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Page {0} not found")]
    PageNotFound(PageId),

    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),

    #[error("Buffer pool is full, no free or evictable frames available")]
    BufferPoolFull,

    #[error("Disk scheduler error: {0}")]
    DiskScheduler(String),

    #[error("Page {page_id} has unknown page type tag {tag}")]
    InvalidPageType { page_id: PageId, tag: u8 },

    #[error("Index corrupted: {0}")]
    IndexCorrupted(String),

    #[error("Header page is full")]
    HeaderPageFull,

    #[error("Index name '{0}' is longer than the header page allows")]
    IndexNameTooLong(String),

    #[error("Invalid key '{0}'")]
    InvalidKey(String),
}

pub type Result<T> = std::result::Result<T, StrataError>;
