use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};

use crate::common::{FrameId, PageId, INVALID_PAGE_ID, PAGE_SIZE};

pub(crate) type PageData = Box<[u8; PAGE_SIZE]>;

pub(crate) type PageReadLock = ArcRwLockReadGuard<RawRwLock, PageData>;
pub(crate) type PageWriteLock = ArcRwLockWriteGuard<RawRwLock, PageData>;

/// One slot of the buffer pool: the bytes of at most one page plus the
/// bookkeeping the pool needs to decide when it may be reused.
///
/// `page_id`, `pin_count` and `is_dirty` are only changed while the pool latch
/// is held; the atomics let guards and introspection read them without it.
pub struct FrameHeader {
    frame_id: FrameId,
    page_id: AtomicU32,
    pin_count: AtomicU32,
    is_dirty: AtomicBool,
    data: Arc<RwLock<PageData>>,
}

impl FrameHeader {
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            page_id: AtomicU32::new(INVALID_PAGE_ID.as_u32()),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
            data: Arc::new(RwLock::new(Box::new([0u8; PAGE_SIZE]))),
        }
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// The page held by this frame, `INVALID_PAGE_ID` when the frame is free.
    pub fn page_id(&self) -> PageId {
        PageId::new(self.page_id.load(Ordering::Acquire))
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Increments the pin count and returns the new value.
    pub fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrements the pin count and returns the new value.
    /// Returns None if the pin count was already 0.
    pub fn unpin(&self) -> Option<u32> {
        self.pin_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            })
            .ok()
            .map(|previous| previous - 1)
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    /// ORs `dirty` into the dirty flag; a clean release never hides an
    /// earlier modification.
    pub fn mark_dirty(&self, dirty: bool) {
        if dirty {
            self.is_dirty.store(true, Ordering::Release);
        }
    }

    pub fn clear_dirty(&self) {
        self.is_dirty.store(false, Ordering::Release);
    }

    /// Shared lock on the page bytes that outlives the borrow of `self`.
    pub(crate) fn read_arc(&self) -> PageReadLock {
        self.data.read_arc()
    }

    /// Exclusive lock on the page bytes that outlives the borrow of `self`.
    pub(crate) fn write_arc(&self) -> PageWriteLock {
        self.data.write_arc()
    }

    /// Copies the page bytes out, e.g. to hand them to the disk scheduler.
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.read().to_vec()
    }

    /// Copies the page bytes out for a write-back and clears the dirty flag.
    /// Returns None without waiting if the page is write-latched; the flag is
    /// left alone then.
    pub fn try_snapshot_for_flush(&self) -> Option<Vec<u8>> {
        let data = self.data.try_read()?;
        self.clear_dirty();
        Some(data.to_vec())
    }

    /// Binds the frame to `page_id` with the given content, clean and unpinned.
    pub fn load(&self, page_id: PageId, content: &[u8]) {
        assert_eq!(content.len(), PAGE_SIZE);
        self.data.write().copy_from_slice(content);
        self.page_id.store(page_id.as_u32(), Ordering::Release);
        self.pin_count.store(0, Ordering::Release);
        self.is_dirty.store(false, Ordering::Release);
    }

    /// Binds the frame to a brand new, zero-filled page.
    pub fn load_zeroed(&self, page_id: PageId) {
        self.data.write().fill(0);
        self.page_id.store(page_id.as_u32(), Ordering::Release);
        self.pin_count.store(0, Ordering::Release);
        self.is_dirty.store(false, Ordering::Release);
    }

    /// Returns the frame to its free state.
    pub fn reset(&self) {
        self.load_zeroed(INVALID_PAGE_ID);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_header_new() {
        let frame = FrameHeader::new(FrameId::new(0));
        assert_eq!(frame.frame_id(), FrameId::new(0));
        assert_eq!(frame.page_id(), INVALID_PAGE_ID);
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());
    }

    #[test]
    fn test_frame_header_pin_unpin_never_negative() {
        let frame = FrameHeader::new(FrameId::new(0));

        assert_eq!(frame.pin(), 1);
        assert_eq!(frame.pin(), 2);
        assert_eq!(frame.unpin(), Some(1));
        assert_eq!(frame.unpin(), Some(0));
        assert_eq!(frame.unpin(), None);
        assert_eq!(frame.pin_count(), 0);
    }

    #[test]
    fn test_frame_header_dirty_is_sticky() {
        let frame = FrameHeader::new(FrameId::new(0));

        frame.mark_dirty(true);
        frame.mark_dirty(false);
        assert!(frame.is_dirty());
        frame.clear_dirty();
        assert!(!frame.is_dirty());
    }

    #[test]
    fn test_frame_header_load_and_reset() {
        let frame = FrameHeader::new(FrameId::new(3));

        let mut content = [0u8; PAGE_SIZE];
        content[0] = 42;
        content[PAGE_SIZE - 1] = 7;
        frame.load(PageId::new(5), &content);
        frame.pin();
        frame.mark_dirty(true);

        assert_eq!(frame.page_id(), PageId::new(5));
        let bytes = frame.snapshot();
        assert_eq!(bytes[0], 42);
        assert_eq!(bytes[PAGE_SIZE - 1], 7);

        frame.reset();
        assert_eq!(frame.page_id(), INVALID_PAGE_ID);
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());
        assert!(frame.snapshot().iter().all(|b| *b == 0));
    }

    #[test]
    fn test_frame_header_flush_snapshot_skips_write_latched_page() {
        let frame = FrameHeader::new(FrameId::new(1));
        frame.load_zeroed(PageId::new(4));
        frame.mark_dirty(true);

        let latch = frame.write_arc();
        assert!(frame.try_snapshot_for_flush().is_none());
        assert!(frame.is_dirty());
        drop(latch);

        let bytes = frame.try_snapshot_for_flush().unwrap();
        assert_eq!(bytes.len(), PAGE_SIZE);
        assert!(!frame.is_dirty());
    }
}
