use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::common::{FrameId, PageId, Result, StrataError, DEFAULT_BUCKET_SIZE};
use crate::container::ExtendibleHashTable;
use crate::storage::disk::{DiskManager, DiskScheduler};

use super::page_guard::ReleaseCallback;
use super::{FrameHeader, LruKReplacer, ReadPageGuard, WritePageGuard};

/// State shared between the pool and the release callbacks of its guards.
struct BufferPoolState {
    /// The buffer pool frames
    frames: Vec<FrameHeader>,
    /// Page table: maps resident page IDs to frame IDs
    page_table: ExtendibleHashTable<PageId, FrameId>,
    /// LRU-K replacer for eviction decisions
    replacer: LruKReplacer,
    /// Frames holding no page. Its mutex is also the pool latch: every change
    /// to the page table, pin counts or replacer happens while it is held.
    free_list: Mutex<VecDeque<FrameId>>,
}

impl BufferPoolState {
    fn frame(&self, frame_id: FrameId) -> &FrameHeader {
        &self.frames[frame_id.as_usize()]
    }

    fn unpin(&self, page_id: PageId, is_dirty: bool) -> bool {
        let _latch = self.free_list.lock();

        let Some(frame_id) = self.page_table.find(&page_id) else {
            return false;
        };
        let frame = self.frame(frame_id);
        match frame.unpin() {
            Some(remaining) => {
                frame.mark_dirty(is_dirty);
                if remaining == 0 {
                    self.replacer.set_evictable(frame_id, true);
                }
                true
            }
            None => false,
        }
    }
}

/// BufferPoolManager is responsible for fetching database pages from disk
/// and storing them in memory. It manages a fixed number of frames and uses
/// the LRU-K replacement policy to decide which pages to evict.
///
/// Pages are handed out behind guards that pin them for the guard's lifetime.
/// When every frame is pinned, `new_page` and the `fetch_*` methods return
/// `Ok(None)` instead of waiting for a frame to free up.
pub struct BufferPoolManager {
    /// Number of frames in the buffer pool
    pool_size: usize,
    state: Arc<BufferPoolState>,
    disk_scheduler: DiskScheduler,
}

impl BufferPoolManager {
    /// Creates a new BufferPoolManager with the given pool size, k value for LRU-K,
    /// and disk manager.
    pub fn new(pool_size: usize, k: usize, disk_manager: Arc<DiskManager>) -> Self {
        let frames = (0..pool_size)
            .map(|i| FrameHeader::new(FrameId::new(i as u32)))
            .collect();
        let free_list = (0..pool_size).map(|i| FrameId::new(i as u32)).collect();

        let state = Arc::new(BufferPoolState {
            frames,
            page_table: ExtendibleHashTable::new(DEFAULT_BUCKET_SIZE),
            replacer: LruKReplacer::new(k, pool_size),
            free_list: Mutex::new(free_list),
        });

        log::debug!("buffer pool created with {pool_size} frames, LRU-{k}");

        Self {
            pool_size,
            state,
            disk_scheduler: DiskScheduler::new(disk_manager),
        }
    }

    /// Allocates a fresh page and returns it pinned behind a write guard.
    /// The page's bytes are zeroed. Returns `Ok(None)` if every frame is pinned.
    pub fn new_page(&self) -> Result<Option<WritePageGuard>> {
        let (frame_id, page_id) = {
            let mut free_list = self.state.free_list.lock();
            let Some(frame_id) = self.acquire_frame(&mut free_list)? else {
                return Ok(None);
            };

            let page_id = match self.disk_scheduler.disk_manager().allocate_page() {
                Ok(page_id) => page_id,
                Err(e) => {
                    free_list.push_back(frame_id);
                    return Err(e);
                }
            };

            let frame = self.state.frame(frame_id);
            frame.load_zeroed(page_id);
            self.install(frame_id, page_id);
            (frame_id, page_id)
        };

        log::trace!("new {page_id} in {frame_id}");
        Ok(Some(self.write_guard(frame_id, page_id)))
    }

    /// Fetches a page for read access, reading it from disk if it is not resident.
    /// Returns `Ok(None)` if the page is not resident and every frame is pinned.
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<Option<ReadPageGuard>> {
        Ok(self
            .fetch_page(page_id)?
            .map(|frame_id| self.read_guard(frame_id, page_id)))
    }

    /// Fetches a page for write access, reading it from disk if it is not resident.
    /// Returns `Ok(None)` if the page is not resident and every frame is pinned.
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<Option<WritePageGuard>> {
        Ok(self
            .fetch_page(page_id)?
            .map(|frame_id| self.write_guard(frame_id, page_id)))
    }

    /// Drops one pin on a page, folding `is_dirty` into its dirty flag.
    /// Returns false if the page is not resident or is not pinned. Guards call
    /// this on drop; calling it by hand is only needed for pins taken without
    /// a guard.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        self.state.unpin(page_id, is_dirty)
    }

    /// Writes a resident page back to disk and clears its dirty flag.
    /// Returns false if the page is not resident, or if a write guard
    /// currently holds it; such a page keeps its dirty flag and is not waited
    /// on, so a thread may flush while holding its own guards.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if !page_id.is_valid() {
            return Err(StrataError::InvalidPageId(page_id));
        }

        // Pin so the frame cannot be reused while the pool latch is released
        // for the write.
        let frame_id = {
            let _latch = self.state.free_list.lock();
            let Some(frame_id) = self.state.page_table.find(&page_id) else {
                return Ok(false);
            };
            self.state.frame(frame_id).pin();
            self.state.replacer.set_evictable(frame_id, false);
            frame_id
        };

        let frame = self.state.frame(frame_id);
        let Some(snapshot) = frame.try_snapshot_for_flush() else {
            log::debug!("{page_id} is write-latched, not flushing it");
            self.state.unpin(page_id, false);
            return Ok(false);
        };
        let result = self
            .disk_scheduler
            .schedule_write_sync(page_id, Bytes::from(snapshot));
        if result.is_err() {
            frame.mark_dirty(true);
        }
        self.state.unpin(page_id, false);

        result.map(|()| true)
    }

    /// Flushes every dirty resident page to disk. Clean pages already match
    /// the disk and are skipped, as are write-latched ones.
    pub fn flush_all_pages(&self) -> Result<()> {
        let dirty: Vec<PageId> = {
            let _latch = self.state.free_list.lock();
            self.state
                .frames
                .iter()
                .filter(|frame| frame.page_id().is_valid() && frame.is_dirty())
                .map(|frame| frame.page_id())
                .collect()
        };

        for page_id in dirty {
            self.flush_page(page_id)?;
        }

        Ok(())
    }

    /// Removes a page from the buffer pool and deallocates it on disk.
    /// Returns false if the page is still pinned. A page that is not resident
    /// has nothing to delete and reports true.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut free_list = self.state.free_list.lock();

        let Some(frame_id) = self.state.page_table.find(&page_id) else {
            return Ok(true);
        };
        let frame = self.state.frame(frame_id);

        if frame.pin_count() > 0 {
            log::warn!(
                "refusing to delete {page_id}: pinned {} time(s)",
                frame.pin_count()
            );
            return Ok(false);
        }

        if frame.is_dirty() {
            self.disk_scheduler
                .schedule_write_sync(page_id, Bytes::from(frame.snapshot()))?;
        }

        self.state.page_table.remove(&page_id);
        self.state.replacer.remove(frame_id);
        frame.reset();
        free_list.push_back(frame_id);

        self.disk_scheduler
            .disk_manager()
            .deallocate_page(page_id)?;

        log::trace!("deleted {page_id}, {frame_id} back on the free list");
        Ok(true)
    }

    /// Returns the pin count for a resident page.
    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        self.state
            .page_table
            .find(&page_id)
            .map(|frame_id| self.state.frame(frame_id).pin_count())
    }

    /// Returns whether a resident page is dirty.
    pub fn is_dirty(&self, page_id: PageId) -> Option<bool> {
        self.state
            .page_table
            .find(&page_id)
            .map(|frame_id| self.state.frame(frame_id).is_dirty())
    }

    /// Returns the pool size.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Returns the number of free frames.
    pub fn free_frame_count(&self) -> usize {
        self.state.free_list.lock().len()
    }

    /// Returns the number of frames holding an unpinned page.
    pub fn evictable_frame_count(&self) -> usize {
        let _latch = self.state.free_list.lock();
        self.state.replacer.size()
    }

    /// Returns the number of frames holding a pinned page.
    pub fn pinned_frame_count(&self) -> usize {
        let _latch = self.state.free_list.lock();
        self.state
            .frames
            .iter()
            .filter(|frame| frame.page_id().is_valid() && frame.pin_count() > 0)
            .count()
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        self.disk_scheduler.disk_manager()
    }

    /// Pins a page, loading it from disk if needed, and returns its frame.
    fn fetch_page(&self, page_id: PageId) -> Result<Option<FrameId>> {
        if !page_id.is_valid() {
            return Err(StrataError::InvalidPageId(page_id));
        }

        let mut free_list = self.state.free_list.lock();

        if let Some(frame_id) = self.state.page_table.find(&page_id) {
            self.state.frame(frame_id).pin();
            self.state.replacer.record_access(frame_id);
            self.state.replacer.set_evictable(frame_id, false);
            return Ok(Some(frame_id));
        }

        let Some(frame_id) = self.acquire_frame(&mut free_list)? else {
            return Ok(None);
        };

        let data = match self.disk_scheduler.schedule_read_sync(page_id) {
            Ok(data) => data,
            Err(e) => {
                free_list.push_back(frame_id);
                return Err(e);
            }
        };

        self.state.frame(frame_id).load(page_id, &data);
        self.install(frame_id, page_id);

        log::trace!("read {page_id} into {frame_id}");
        Ok(Some(frame_id))
    }

    /// Pins a freshly loaded frame and publishes it in the page table.
    /// Caller holds the pool latch.
    fn install(&self, frame_id: FrameId, page_id: PageId) {
        self.state.frame(frame_id).pin();
        self.state.page_table.insert(page_id, frame_id);
        self.state.replacer.record_access(frame_id);
        self.state.replacer.set_evictable(frame_id, false);
    }

    /// Gets an empty frame, either from the free list or by evicting a page.
    /// Caller holds the pool latch (passed in as the free list).
    fn acquire_frame(&self, free_list: &mut VecDeque<FrameId>) -> Result<Option<FrameId>> {
        if let Some(frame_id) = free_list.pop_front() {
            return Ok(Some(frame_id));
        }

        let Some(frame_id) = self.state.replacer.evict() else {
            log::debug!("no free or evictable frame among {}", self.pool_size);
            return Ok(None);
        };

        let frame = self.state.frame(frame_id);
        let victim = frame.page_id();

        if frame.is_dirty() {
            log::trace!("writing back dirty {victim} before reusing {frame_id}");
            if let Err(e) = self
                .disk_scheduler
                .schedule_write_sync(victim, Bytes::from(frame.snapshot()))
            {
                // Put the victim back exactly as it was
                self.state.replacer.record_access(frame_id);
                self.state.replacer.set_evictable(frame_id, true);
                return Err(e);
            }
        }

        self.state.page_table.remove(&victim);
        frame.reset();

        Ok(Some(frame_id))
    }

    fn release_callback(&self) -> ReleaseCallback {
        let state = Arc::clone(&self.state);
        Box::new(move |page_id, is_dirty| {
            state.unpin(page_id, is_dirty);
        })
    }

    fn read_guard(&self, frame_id: FrameId, page_id: PageId) -> ReadPageGuard {
        let data = self.state.frame(frame_id).read_arc();
        ReadPageGuard::new(page_id, data, self.release_callback())
    }

    fn write_guard(&self, frame_id: FrameId, page_id: PageId) -> WritePageGuard {
        let data = self.state.frame(frame_id).write_arc();
        WritePageGuard::new(page_id, data, self.release_callback())
    }
}
