use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::common::{FrameId, Timestamp};

/// How a page access was generated. Threaded from the buffer pool into the
/// replacer; reserved for future policy (e.g. scan-resistant admission) and
/// not consulted when choosing victims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessType {
    #[default]
    Unknown,
    Get,
    Scan,
}

/// Tracks access history for a single frame
#[derive(Debug)]
struct FrameInfo {
    /// The k most recent access timestamps (oldest at front)
    history: VecDeque<Timestamp>,
    /// Whether this frame is currently evictable
    is_evictable: bool,
    /// Position of this frame in its priority heap, if evictable
    heap_pos: Option<usize>,
}

impl FrameInfo {
    fn new() -> Self {
        Self {
            history: VecDeque::new(),
            is_evictable: false,
            heap_pos: None,
        }
    }
}

/// Binary min-heap of `(timestamp, frame_id)` entries. Each resident frame's
/// position is mirrored into the frame arena (`FrameInfo::heap_pos`) so that
/// arbitrary entries can be removed in O(log n) when a frame is re-accessed,
/// pinned, or dropped out of order.
#[derive(Debug, Default)]
struct AccessHeap {
    entries: Vec<(Timestamp, FrameId)>,
}

impl AccessHeap {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn push(&mut self, key: Timestamp, frame_id: FrameId, arena: &mut [Option<FrameInfo>]) {
        let i = self.entries.len();
        self.entries.push((key, frame_id));
        Self::set_pos(arena, frame_id, Some(i));
        self.sift_up(i, arena);
    }

    /// Removes the entry at heap position `pos`.
    fn remove(&mut self, pos: usize, arena: &mut [Option<FrameInfo>]) {
        let (_, removed) = self.entries[pos];
        Self::set_pos(arena, removed, None);
        self.entries.swap_remove(pos);
        if pos < self.entries.len() {
            let moved = self.entries[pos].1;
            Self::set_pos(arena, moved, Some(pos));
            // The swapped-in tail entry may be out of order in either direction.
            self.sift_down(pos, arena);
            self.sift_up(pos, arena);
        }
    }

    fn pop(&mut self, arena: &mut [Option<FrameInfo>]) -> Option<FrameId> {
        if self.entries.is_empty() {
            return None;
        }
        let frame_id = self.entries[0].1;
        self.remove(0, arena);
        Some(frame_id)
    }

    fn sift_up(&mut self, mut i: usize, arena: &mut [Option<FrameInfo>]) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.entries[parent].0 <= self.entries[i].0 {
                break;
            }
            self.swap_entries(parent, i, arena);
            i = parent;
        }
    }

    fn sift_down(&mut self, mut i: usize, arena: &mut [Option<FrameInfo>]) {
        loop {
            let mut smallest = i;
            let left = 2 * i + 1;
            let right = 2 * i + 2;
            if left < self.entries.len() && self.entries[left].0 < self.entries[smallest].0 {
                smallest = left;
            }
            if right < self.entries.len() && self.entries[right].0 < self.entries[smallest].0 {
                smallest = right;
            }
            if smallest == i {
                break;
            }
            self.swap_entries(i, smallest, arena);
            i = smallest;
        }
    }

    fn swap_entries(&mut self, a: usize, b: usize, arena: &mut [Option<FrameInfo>]) {
        self.entries.swap(a, b);
        Self::set_pos(arena, self.entries[a].1, Some(a));
        Self::set_pos(arena, self.entries[b].1, Some(b));
    }

    fn set_pos(arena: &mut [Option<FrameInfo>], frame_id: FrameId, pos: Option<usize>) {
        arena[frame_id.as_usize()]
            .as_mut()
            .expect("heap entry for untracked frame")
            .heap_pos = pos;
    }
}

struct LruKCore {
    /// Access info per frame, indexed densely by frame id
    frames: Vec<Option<FrameInfo>>,
    /// Evictable frames with fewer than k accesses, keyed by earliest access
    /// timestamp - classical LRU among the +inf backward-distance frames
    partial_heap: AccessHeap,
    /// Evictable frames with exactly k accesses, keyed by the k-th most
    /// recent access timestamp (the front of the capped history)
    full_heap: AccessHeap,
    /// Monotonically increasing logical clock
    current_timestamp: Timestamp,
    /// Number of evictable frames
    num_evictable: usize,
}

/// LRU-K replacement policy.
///
/// Evicts the frame whose backward k-distance (time since the k-th most
/// recent access) is largest. A frame with fewer than k recorded accesses has
/// +inf backward k-distance; among those, the one with the earliest recorded
/// access is evicted first.
pub struct LruKReplacer {
    /// K value for the LRU-K algorithm
    k: usize,
    /// Maximum number of frames the replacer can track
    num_frames: usize,
    core: Mutex<LruKCore>,
}

impl LruKReplacer {
    pub fn new(k: usize, num_frames: usize) -> Self {
        assert!(k > 0, "k must be positive");
        let mut frames = Vec::with_capacity(num_frames);
        frames.resize_with(num_frames, || None);
        Self {
            k,
            num_frames,
            core: Mutex::new(LruKCore {
                frames,
                partial_heap: AccessHeap::default(),
                full_heap: AccessHeap::default(),
                current_timestamp: 0,
                num_evictable: 0,
            }),
        }
    }

    /// Records that the given frame was accessed at the current timestamp,
    /// creating its history entry lazily.
    ///
    /// Panics if `frame_id` is outside `[0, num_frames)`.
    pub fn record_access(&self, frame_id: FrameId, _access_type: AccessType) {
        assert!(
            frame_id.as_usize() < self.num_frames,
            "frame id out of range: {frame_id}"
        );

        let mut core = self.core.lock();
        let core = &mut *core;

        let ts = core.current_timestamp;
        core.current_timestamp += 1;

        let (was_partial, is_partial, is_evictable, heap_pos, key) = {
            let info = core.frames[frame_id.as_usize()].get_or_insert_with(FrameInfo::new);
            let was_partial = info.history.len() < self.k;
            info.history.push_back(ts);
            if info.history.len() > self.k {
                info.history.pop_front();
            }
            (
                was_partial,
                info.history.len() < self.k,
                info.is_evictable,
                info.heap_pos,
                *info.history.front().expect("history is non-empty"),
            )
        };

        // An evictable frame's priority key changed: re-seat it.
        if is_evictable {
            let pos = heap_pos.expect("evictable frame must be heap-resident");
            if was_partial {
                core.partial_heap.remove(pos, &mut core.frames);
            } else {
                core.full_heap.remove(pos, &mut core.frames);
            }
            if is_partial {
                core.partial_heap.push(key, frame_id, &mut core.frames);
            } else {
                core.full_heap.push(key, frame_id, &mut core.frames);
            }
        }
    }

    /// Toggles whether a frame is evictable, adjusting the replacer size.
    /// No-op if the state is unchanged.
    ///
    /// Panics if `frame_id` is out of range or the frame is not tracked.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        assert!(
            frame_id.as_usize() < self.num_frames,
            "frame id out of range: {frame_id}"
        );

        let mut core = self.core.lock();
        let core = &mut *core;

        let (is_partial, heap_pos, key) = {
            let info = core.frames[frame_id.as_usize()]
                .as_mut()
                .expect("frame is not tracked by the replacer");
            if info.is_evictable == evictable {
                return;
            }
            info.is_evictable = evictable;
            (
                info.history.len() < self.k,
                info.heap_pos,
                *info.history.front().expect("history is non-empty"),
            )
        };

        if evictable {
            core.num_evictable += 1;
            if is_partial {
                core.partial_heap.push(key, frame_id, &mut core.frames);
            } else {
                core.full_heap.push(key, frame_id, &mut core.frames);
            }
        } else {
            core.num_evictable -= 1;
            let pos = heap_pos.expect("evictable frame must be heap-resident");
            if is_partial {
                core.partial_heap.remove(pos, &mut core.frames);
            } else {
                core.full_heap.remove(pos, &mut core.frames);
            }
        }
    }

    /// Evicts the frame with the largest backward k-distance, removing its
    /// access history. Returns None if there is no evictable frame.
    pub fn evict(&self) -> Option<FrameId> {
        let mut core = self.core.lock();
        let core = &mut *core;

        if core.num_evictable == 0 {
            return None;
        }

        // Frames with fewer than k accesses (+inf distance) go first.
        let frame_id = if core.partial_heap.len() > 0 {
            core.partial_heap.pop(&mut core.frames)
        } else {
            core.full_heap.pop(&mut core.frames)
        }?;

        core.frames[frame_id.as_usize()] = None;
        core.num_evictable -= 1;
        Some(frame_id)
    }

    /// Forcibly untracks a frame regardless of its k-distance.
    /// No-op if the frame is not tracked.
    ///
    /// Panics if the frame is tracked but not evictable.
    pub fn remove(&self, frame_id: FrameId) {
        assert!(
            frame_id.as_usize() < self.num_frames,
            "frame id out of range: {frame_id}"
        );

        let mut core = self.core.lock();
        let core = &mut *core;

        let (is_partial, heap_pos) = match core.frames[frame_id.as_usize()].as_ref() {
            None => return,
            Some(info) => {
                assert!(info.is_evictable, "can't remove a non-evictable frame");
                (info.history.len() < self.k, info.heap_pos)
            }
        };

        let pos = heap_pos.expect("evictable frame must be heap-resident");
        if is_partial {
            core.partial_heap.remove(pos, &mut core.frames);
        } else {
            core.full_heap.remove(pos, &mut core.frames);
        }
        core.frames[frame_id.as_usize()] = None;
        core.num_evictable -= 1;
    }

    /// Returns the number of evictable frames.
    pub fn size(&self) -> usize {
        self.core.lock().num_evictable
    }

    pub fn k(&self) -> usize {
        self.k
    }
}
