use std::ops::{Deref, DerefMut};

use crate::common::PageId;

use super::frame_header::{PageReadLock, PageWriteLock};

/// Called exactly once when a guard goes away, with the page id and whether
/// the holder modified the page. The buffer pool uses it to unpin.
pub(crate) type ReleaseCallback = Box<dyn FnOnce(PageId, bool) + Send + Sync>;

/// Unpin-on-drop bookkeeping shared by both guard kinds.
struct PinRelease {
    page_id: PageId,
    is_dirty: bool,
    release_callback: Option<ReleaseCallback>,
}

impl PinRelease {
    fn new(page_id: PageId, release_callback: ReleaseCallback) -> Self {
        Self {
            page_id,
            is_dirty: false,
            release_callback: Some(release_callback),
        }
    }

    fn release(&mut self) {
        if let Some(callback) = self.release_callback.take() {
            callback(self.page_id, self.is_dirty);
        }
    }
}

/// RAII guard for read-only access to a pinned page.
/// Holds a shared latch on the page bytes and unpins the page when dropped.
pub struct ReadPageGuard {
    pin: PinRelease,
    data: Option<PageReadLock>,
}

impl ReadPageGuard {
    pub(crate) fn new(page_id: PageId, data: PageReadLock, release_callback: ReleaseCallback) -> Self {
        Self {
            pin: PinRelease::new(page_id, release_callback),
            data: Some(data),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.pin.page_id
    }

    pub fn data(&self) -> &[u8] {
        match &self.data {
            Some(data) => &data[..],
            None => &[],
        }
    }
}

impl Deref for ReadPageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        // Latch first, pin second: once unpinned the frame may be reused.
        self.data.take();
        self.pin.release();
    }
}

/// RAII guard for exclusive access to a pinned page.
///
/// The page is reported dirty on release if `data_mut` was called or the
/// holder called `mark_dirty`.
pub struct WritePageGuard {
    pin: PinRelease,
    data: Option<PageWriteLock>,
}

impl WritePageGuard {
    pub(crate) fn new(
        page_id: PageId,
        data: PageWriteLock,
        release_callback: ReleaseCallback,
    ) -> Self {
        Self {
            pin: PinRelease::new(page_id, release_callback),
            data: Some(data),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.pin.page_id
    }

    pub fn data(&self) -> &[u8] {
        match &self.data {
            Some(data) => &data[..],
            None => &[],
        }
    }

    /// Mutable access to the page bytes. Marks the page dirty.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.pin.is_dirty = true;
        match &mut self.data {
            Some(data) => &mut data[..],
            None => &mut [],
        }
    }

    /// Sets the dirty flag reported when the guard is released.
    pub fn mark_dirty(&mut self, is_dirty: bool) {
        self.pin.is_dirty = is_dirty;
    }

    pub fn is_dirty(&self) -> bool {
        self.pin.is_dirty
    }
}

impl Deref for WritePageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl DerefMut for WritePageGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data_mut()
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        self.data.take();
        self.pin.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::FrameHeader;
    use crate::common::{FrameId, PAGE_SIZE};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_read_page_guard_releases_clean() {
        let frame = FrameHeader::new(FrameId::new(0));
        let mut content = [0u8; PAGE_SIZE];
        content[0] = 42;
        frame.load(PageId::new(1), &content);

        let released = Arc::new(AtomicBool::new(false));
        let dirty = Arc::new(AtomicBool::new(true));
        let (released_clone, dirty_clone) = (released.clone(), dirty.clone());

        let guard = ReadPageGuard::new(
            PageId::new(1),
            frame.read_arc(),
            Box::new(move |_, is_dirty| {
                released_clone.store(true, Ordering::SeqCst);
                dirty_clone.store(is_dirty, Ordering::SeqCst);
            }),
        );

        assert_eq!(guard.page_id(), PageId::new(1));
        assert_eq!(guard[0], 42);
        assert!(!released.load(Ordering::SeqCst));

        drop(guard);
        assert!(released.load(Ordering::SeqCst));
        assert!(!dirty.load(Ordering::SeqCst));
    }

    #[test]
    fn test_write_page_guard_reports_dirty() {
        let frame = FrameHeader::new(FrameId::new(0));
        frame.load_zeroed(PageId::new(1));

        let dirty = Arc::new(AtomicBool::new(false));
        let dirty_clone = dirty.clone();

        let mut guard = WritePageGuard::new(
            PageId::new(1),
            frame.write_arc(),
            Box::new(move |_, is_dirty| dirty_clone.store(is_dirty, Ordering::SeqCst)),
        );
        guard.data_mut()[0] = 42;
        drop(guard);

        assert!(dirty.load(Ordering::SeqCst));
        assert_eq!(frame.snapshot()[0], 42);
    }

    #[test]
    fn test_write_page_guard_latch_released_before_callback() {
        let frame = Arc::new(FrameHeader::new(FrameId::new(0)));
        let frame_clone = frame.clone();

        let guard = WritePageGuard::new(
            PageId::new(1),
            frame.write_arc(),
            // Would deadlock if the write latch were still held here
            Box::new(move |_, _| {
                let _ = frame_clone.snapshot();
            }),
        );
        drop(guard);
    }
}
