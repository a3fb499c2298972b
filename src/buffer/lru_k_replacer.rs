use std::collections::{BTreeSet, HashMap, VecDeque};

use parking_lot::Mutex;

use crate::common::{FrameId, Timestamp};

/// Tracks access history for a single frame
#[derive(Debug)]
struct FrameAccessInfo {
    /// The last (up to) k access timestamps, most recent at back
    history: VecDeque<Timestamp>,
    /// Whether this frame is currently evictable
    is_evictable: bool,
}

impl FrameAccessInfo {
    fn new() -> Self {
        Self {
            history: VecDeque::new(),
            is_evictable: false,
        }
    }

    fn record_access(&mut self, timestamp: Timestamp, k: usize) {
        self.history.push_back(timestamp);
        while self.history.len() > k {
            self.history.pop_front();
        }
    }

    /// A frame with fewer than k accesses has +inf backward k-distance.
    fn is_mature(&self, k: usize) -> bool {
        self.history.len() >= k
    }

    /// The timestamp the frame is ordered by inside its list.
    ///
    /// Young frames are ordered by their most recent access (plain LRU),
    /// mature frames by their k-th most recent access. Since the history is
    /// capped at k entries, the k-th most recent access is the front.
    fn order_key(&self, k: usize) -> Timestamp {
        if self.is_mature(k) {
            self.history.front().copied().unwrap_or_default()
        } else {
            self.history.back().copied().unwrap_or_default()
        }
    }
}

/// Everything the replacer knows, guarded by a single mutex.
#[derive(Debug, Default)]
struct ReplacerState {
    frames: HashMap<FrameId, FrameAccessInfo>,
    /// Evictable frames with fewer than k accesses, oldest first
    young: BTreeSet<(Timestamp, FrameId)>,
    /// Evictable frames with at least k accesses, oldest k-th access first
    mature: BTreeSet<(Timestamp, FrameId)>,
    current_timestamp: Timestamp,
    num_evictable: usize,
}

impl ReplacerState {
    fn list_for(&mut self, mature: bool) -> &mut BTreeSet<(Timestamp, FrameId)> {
        if mature {
            &mut self.mature
        } else {
            &mut self.young
        }
    }

    fn unlink(&mut self, frame_id: FrameId, k: usize) {
        if let Some(info) = self.frames.get(&frame_id) {
            let entry = (info.order_key(k), frame_id);
            let mature = info.is_mature(k);
            self.list_for(mature).remove(&entry);
        }
    }

    fn link(&mut self, frame_id: FrameId, k: usize) {
        if let Some(info) = self.frames.get(&frame_id) {
            let entry = (info.order_key(k), frame_id);
            let mature = info.is_mature(k);
            self.list_for(mature).insert(entry);
        }
    }
}

/// LRU-K Replacement Policy
///
/// The LRU-K algorithm evicts a frame whose backward k-distance is the maximum
/// of all frames in the replacer. Backward k-distance is computed as the difference
/// in time between the current timestamp and the timestamp of kth previous access.
///
/// A frame with fewer than k historical accesses is given +inf as its backward
/// k-distance. Frames with +inf distance always go first, and among them the one
/// whose most recent access is oldest is chosen (classic LRU).
///
/// Internally the evictable frames live in two ordered sets, `young` (+inf
/// distance) and `mature`, so eviction is a pop from the front of one of them.
pub struct LruKReplacer {
    /// K value for the LRU-K algorithm
    k: usize,
    /// Maximum number of frames the replacer can track
    max_frames: usize,
    state: Mutex<ReplacerState>,
}

impl LruKReplacer {
    /// Creates a new LRU-K replacer with the given k value and maximum frame count.
    pub fn new(k: usize, max_frames: usize) -> Self {
        assert!(k > 0, "LRU-K requires k >= 1");
        Self {
            k,
            max_frames,
            state: Mutex::new(ReplacerState::default()),
        }
    }

    /// Evicts the frame with the largest backward k-distance and forgets its
    /// history. Returns None if there are no evictable frames.
    pub fn evict(&self) -> Option<FrameId> {
        let mut state = self.state.lock();

        let (_, frame_id) = match state.young.pop_first() {
            Some(entry) => entry,
            None => state.mature.pop_first()?,
        };

        let info = state.frames.remove(&frame_id);
        assert!(
            info.map_or(false, |info| info.is_evictable),
            "replacer list held non-evictable {frame_id}"
        );
        state.num_evictable -= 1;

        log::trace!("lru-k evicted {frame_id}");
        Some(frame_id)
    }

    /// Records that the given frame was accessed at the current timestamp.
    /// This method should be called after a page is pinned in the BufferPoolManager.
    ///
    /// # Panics
    /// If the frame id is out of range, or if tracking it would exceed the
    /// replacer's capacity.
    pub fn record_access(&self, frame_id: FrameId) {
        self.check_frame_id(frame_id);

        let mut state = self.state.lock();
        let timestamp = state.current_timestamp;
        state.current_timestamp += 1;

        if !state.frames.contains_key(&frame_id) {
            assert!(
                state.frames.len() < self.max_frames,
                "replacer already tracks {} frames",
                self.max_frames
            );
            state.frames.insert(frame_id, FrameAccessInfo::new());
        }

        let is_evictable = state.frames[&frame_id].is_evictable;
        if is_evictable {
            state.unlink(frame_id, self.k);
        }
        if let Some(info) = state.frames.get_mut(&frame_id) {
            info.record_access(timestamp, self.k);
        }
        if is_evictable {
            state.link(frame_id, self.k);
        }
    }

    /// Sets whether a frame is evictable.
    /// When a frame's pin count drops to 0, it should be marked as evictable.
    /// Frames the replacer has never seen are ignored.
    pub fn set_evictable(&self, frame_id: FrameId, is_evictable: bool) {
        self.check_frame_id(frame_id);

        let mut state = self.state.lock();
        let was_evictable = match state.frames.get(&frame_id) {
            Some(info) => info.is_evictable,
            None => return,
        };
        if was_evictable == is_evictable {
            return;
        }

        if is_evictable {
            if let Some(info) = state.frames.get_mut(&frame_id) {
                info.is_evictable = true;
            }
            state.link(frame_id, self.k);
            state.num_evictable += 1;
        } else {
            state.unlink(frame_id, self.k);
            if let Some(info) = state.frames.get_mut(&frame_id) {
                info.is_evictable = false;
            }
            state.num_evictable -= 1;
        }
    }

    /// Removes an evictable frame and its access history from the replacer.
    /// This should be called when a page is deleted from the BufferPoolManager.
    ///
    /// # Panics
    /// If the frame is tracked but not evictable.
    pub fn remove(&self, frame_id: FrameId) {
        let mut state = self.state.lock();

        let is_evictable = match state.frames.get(&frame_id) {
            Some(info) => info.is_evictable,
            None => return,
        };
        assert!(is_evictable, "cannot remove non-evictable {frame_id}");

        state.unlink(frame_id, self.k);
        state.frames.remove(&frame_id);
        state.num_evictable -= 1;
    }

    /// Returns the number of evictable frames.
    pub fn size(&self) -> usize {
        self.state.lock().num_evictable
    }

    /// Returns the k value of this replacer.
    pub fn k(&self) -> usize {
        self.k
    }

    fn check_frame_id(&self, frame_id: FrameId) {
        assert!(
            frame_id.as_usize() < self.max_frames,
            "{frame_id} out of range for replacer of {} frames",
            self.max_frames
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fid(id: u32) -> FrameId {
        FrameId::new(id)
    }

    #[test]
    fn test_lru_k_replacer_new() {
        let replacer = LruKReplacer::new(2, 10);
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.k(), 2);
    }

    #[test]
    fn test_lru_k_replacer_evict_empty() {
        let replacer = LruKReplacer::new(2, 10);
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_lru_k_replacer_new_frames_start_pinned() {
        let replacer = LruKReplacer::new(2, 10);

        replacer.record_access(fid(0));
        replacer.record_access(fid(1));
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.evict(), None);

        replacer.set_evictable(fid(1), true);
        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.evict(), Some(fid(1)));
    }

    #[test]
    fn test_lru_k_replacer_young_before_mature() {
        let replacer = LruKReplacer::new(2, 10);

        // Frame 0 reaches k accesses first, frame 1 stays young
        replacer.record_access(fid(0));
        replacer.record_access(fid(0));
        replacer.record_access(fid(1));

        replacer.set_evictable(fid(0), true);
        replacer.set_evictable(fid(1), true);

        assert_eq!(replacer.evict(), Some(fid(1)));
        assert_eq!(replacer.evict(), Some(fid(0)));
    }

    #[test]
    fn test_lru_k_replacer_young_uses_most_recent_access() {
        let replacer = LruKReplacer::new(3, 10);

        // Both stay under k=3; frame 0 is touched again last
        replacer.record_access(fid(0));
        replacer.record_access(fid(1));
        replacer.record_access(fid(0));

        replacer.set_evictable(fid(0), true);
        replacer.set_evictable(fid(1), true);

        assert_eq!(replacer.evict(), Some(fid(1)));
        assert_eq!(replacer.evict(), Some(fid(0)));
    }

    #[test]
    fn test_lru_k_replacer_access_while_evictable_reorders() {
        let replacer = LruKReplacer::new(2, 10);

        replacer.record_access(fid(0));
        replacer.record_access(fid(1));
        replacer.set_evictable(fid(0), true);
        replacer.set_evictable(fid(1), true);

        // Frame 0 becomes mature while sitting in the evictable set
        replacer.record_access(fid(0));
        assert_eq!(replacer.size(), 2);
        assert_eq!(replacer.evict(), Some(fid(1)));
        assert_eq!(replacer.evict(), Some(fid(0)));
    }

    #[test]
    fn test_lru_k_replacer_remove() {
        let replacer = LruKReplacer::new(2, 10);

        replacer.record_access(fid(0));
        replacer.set_evictable(fid(0), true);
        assert_eq!(replacer.size(), 1);

        replacer.remove(fid(0));
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.evict(), None);

        // Unknown frames are ignored
        replacer.remove(fid(3));
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    #[should_panic]
    fn test_lru_k_replacer_remove_pinned_panics() {
        let replacer = LruKReplacer::new(2, 10);
        replacer.record_access(fid(0));
        replacer.remove(fid(0));
    }

    #[test]
    #[should_panic]
    fn test_lru_k_replacer_out_of_range_panics() {
        let replacer = LruKReplacer::new(2, 4);
        replacer.record_access(fid(4));
    }

    #[test]
    fn test_lru_k_replacer_set_evictable_unknown_is_noop() {
        let replacer = LruKReplacer::new(2, 4);
        replacer.set_evictable(fid(2), true);
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.evict(), None);
    }
}
