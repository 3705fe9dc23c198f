//! Integration tests for the LRU-K replacer

use vellum::buffer::{AccessType, LruKReplacer};
use vellum::common::FrameId;

#[test]
fn test_lru_k_eviction_order() {
    let replacer = LruKReplacer::new(2, 10);

    for i in 0..5 {
        replacer.record_access(FrameId::new(i), AccessType::Unknown);
        replacer.set_evictable(FrameId::new(i), true);
    }

    assert_eq!(replacer.size(), 5);

    // All frames have a single access (fewer than k=2), so all have +inf
    // distance and leave in first-access order.
    for i in 0..5 {
        assert_eq!(replacer.evict(), Some(FrameId::new(i)));
    }

    assert_eq!(replacer.size(), 0);
    assert_eq!(replacer.evict(), None);
}

#[test]
fn test_lru_k_classic_scenario() {
    // The classic LRU-K example: with k=2, frames 1..=6 accessed twice in
    // order, then frames 1..=5 a third time. Frame 6's second access is now
    // the oldest k-th access, so it goes first, followed by 1..=5.
    let replacer = LruKReplacer::new(2, 7);

    for _ in 0..2 {
        for i in 1..=6 {
            replacer.record_access(FrameId::new(i), AccessType::Unknown);
        }
    }
    for i in 1..=6 {
        replacer.set_evictable(FrameId::new(i), true);
    }
    for i in 1..=5 {
        replacer.record_access(FrameId::new(i), AccessType::Unknown);
    }

    assert_eq!(replacer.size(), 6);
    for expected in [6, 1, 2, 3, 4, 5] {
        assert_eq!(replacer.evict(), Some(FrameId::new(expected)));
    }
    assert_eq!(replacer.evict(), None);
}

#[test]
fn test_lru_k_respects_k_distance() {
    let replacer = LruKReplacer::new(2, 10);

    // Frame 0: accessed once (+inf k-distance)
    replacer.record_access(FrameId::new(0), AccessType::Unknown);

    // Frames 1 and 2: accessed twice, frame 1 earlier
    replacer.record_access(FrameId::new(1), AccessType::Unknown);
    replacer.record_access(FrameId::new(1), AccessType::Unknown);
    replacer.record_access(FrameId::new(2), AccessType::Unknown);
    replacer.record_access(FrameId::new(2), AccessType::Unknown);

    replacer.set_evictable(FrameId::new(0), true);
    replacer.set_evictable(FrameId::new(1), true);
    replacer.set_evictable(FrameId::new(2), true);

    assert_eq!(replacer.evict(), Some(FrameId::new(0)));
    assert_eq!(replacer.evict(), Some(FrameId::new(1)));
    assert_eq!(replacer.evict(), Some(FrameId::new(2)));
}

#[test]
fn test_lru_k_pinned_frames_not_evicted() {
    let replacer = LruKReplacer::new(2, 10);

    for i in 0..3 {
        replacer.record_access(FrameId::new(i), AccessType::Unknown);
    }

    // Only frames 1 and 2 are evictable.
    replacer.set_evictable(FrameId::new(1), true);
    replacer.set_evictable(FrameId::new(2), true);

    assert_eq!(replacer.size(), 2);

    assert_eq!(replacer.evict(), Some(FrameId::new(1)));
    assert_eq!(replacer.evict(), Some(FrameId::new(2)));
    assert_eq!(replacer.evict(), None);
}

#[test]
fn test_lru_k_size_accounting() {
    let replacer = LruKReplacer::new(2, 10);

    for i in 0..4 {
        replacer.record_access(FrameId::new(i), AccessType::Unknown);
        replacer.set_evictable(FrameId::new(i), true);
    }
    assert_eq!(replacer.size(), 4);

    replacer.set_evictable(FrameId::new(0), false);
    assert_eq!(replacer.size(), 3);

    // Unchanged state is a no-op for the counter.
    replacer.set_evictable(FrameId::new(0), false);
    replacer.set_evictable(FrameId::new(1), true);
    assert_eq!(replacer.size(), 3);

    replacer.remove(FrameId::new(1));
    assert_eq!(replacer.size(), 2);

    replacer.evict();
    assert_eq!(replacer.size(), 1);
}

#[test]
fn test_lru_k_toggle_evictable() {
    let replacer = LruKReplacer::new(2, 10);

    replacer.record_access(FrameId::new(0), AccessType::Unknown);
    replacer.set_evictable(FrameId::new(0), true);
    assert_eq!(replacer.size(), 1);

    replacer.set_evictable(FrameId::new(0), false);
    assert_eq!(replacer.size(), 0);
    assert_eq!(replacer.evict(), None);

    replacer.set_evictable(FrameId::new(0), true);
    assert_eq!(replacer.size(), 1);
    assert_eq!(replacer.evict(), Some(FrameId::new(0)));
}

#[test]
fn test_lru_k_multiple_inf_distance() {
    let replacer = LruKReplacer::new(3, 10);

    // All frames stay below k=3 accesses.
    replacer.record_access(FrameId::new(0), AccessType::Unknown);
    replacer.record_access(FrameId::new(1), AccessType::Unknown);
    replacer.record_access(FrameId::new(1), AccessType::Unknown);
    replacer.record_access(FrameId::new(2), AccessType::Unknown);

    for i in 0..3 {
        replacer.set_evictable(FrameId::new(i), true);
    }

    // Eviction falls back to classical LRU on the first recorded access.
    assert_eq!(replacer.evict(), Some(FrameId::new(0)));
    assert_eq!(replacer.evict(), Some(FrameId::new(1)));
    assert_eq!(replacer.evict(), Some(FrameId::new(2)));
}

#[test]
fn test_lru_k_history_limit() {
    let replacer = LruKReplacer::new(2, 10);

    for _ in 0..10 {
        replacer.record_access(FrameId::new(0), AccessType::Unknown);
    }
    replacer.record_access(FrameId::new(1), AccessType::Unknown);
    replacer.record_access(FrameId::new(1), AccessType::Unknown);

    replacer.set_evictable(FrameId::new(0), true);
    replacer.set_evictable(FrameId::new(1), true);

    // Only frame 0's two most recent accesses count, and both predate
    // frame 1's accesses.
    assert_eq!(replacer.evict(), Some(FrameId::new(0)));
    assert_eq!(replacer.evict(), Some(FrameId::new(1)));
}

#[test]
fn test_lru_k_concurrent_access() {
    use std::sync::Arc;
    use std::thread;

    let replacer = Arc::new(LruKReplacer::new(2, 100));

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let replacer = Arc::clone(&replacer);
            thread::spawn(move || {
                for i in 0..25 {
                    let frame_id = FrameId::new((t * 25 + i) as u32);
                    replacer.record_access(frame_id, AccessType::Unknown);
                    replacer.set_evictable(frame_id, true);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(replacer.size(), 100);

    for _ in 0..100 {
        assert!(replacer.evict().is_some());
    }

    assert_eq!(replacer.size(), 0);
}
