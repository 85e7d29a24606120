//! Page replacement policies for the buffer pool.

use crate::frame::FrameId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Trait for page replacement algorithms.
///
/// The replacer never tracks pin state itself; `evict` is handed a predicate
/// so the pool can rule out pinned or empty frames at the moment of eviction.
pub trait Replacer: Send + Sync {
    /// Records that the given frame was accessed.
    fn record_access(&self, frame_id: FrameId);

    /// Selects a victim frame for eviction among frames accepted by `can_evict`.
    ///
    /// Returns None if no candidate frame is acceptable.
    fn evict(&self, can_evict: &dyn Fn(FrameId) -> bool) -> Option<FrameId>;

    /// Forgets any access history for a frame.
    fn remove(&self, frame_id: FrameId);
}

/// Clock (second-chance) replacement algorithm.
///
/// Reference bits are atomics so access recording is lock-free; only the
/// clock hand is behind a mutex.
pub struct ClockReplacer {
    /// Reference bits, one per frame.
    reference_bits: Vec<AtomicBool>,
    /// Current clock hand position.
    clock_hand: Mutex<usize>,
}

impl ClockReplacer {
    /// Creates a new clock replacer for the given number of frames.
    pub fn new(num_frames: usize) -> Self {
        Self {
            reference_bits: (0..num_frames).map(|_| AtomicBool::new(false)).collect(),
            clock_hand: Mutex::new(0),
        }
    }

    /// Returns the total capacity.
    pub fn capacity(&self) -> usize {
        self.reference_bits.len()
    }
}

impl Replacer for ClockReplacer {
    #[inline]
    fn record_access(&self, frame_id: FrameId) {
        if let Some(bit) = self.reference_bits.get(frame_id.0 as usize) {
            bit.store(true, Ordering::Relaxed);
        }
    }

    fn evict(&self, can_evict: &dyn Fn(FrameId) -> bool) -> Option<FrameId> {
        let num_frames = self.reference_bits.len();
        if num_frames == 0 {
            return None;
        }

        let mut hand = self.clock_hand.lock();

        // At most two full sweeps: the first may only clear reference bits,
        // the second then finds a victim among the cleared frames.
        for _ in 0..(2 * num_frames) {
            let idx = *hand;
            *hand = (idx + 1) % num_frames;

            let frame_id = FrameId(idx as u32);
            if !can_evict(frame_id) {
                continue;
            }
            if self.reference_bits[idx].load(Ordering::Relaxed) {
                self.reference_bits[idx].store(false, Ordering::Relaxed);
            } else {
                return Some(frame_id);
            }
        }

        // All candidates kept their reference bit alive across both sweeps;
        // fall back to the first acceptable frame.
        (0..num_frames)
            .map(|i| FrameId(i as u32))
            .find(|&f| can_evict(f))
    }

    fn remove(&self, frame_id: FrameId) {
        if let Some(bit) = self.reference_bits.get(frame_id.0 as usize) {
            bit.store(false, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_replacer_new() {
        let replacer = ClockReplacer::new(10);
        assert_eq!(replacer.capacity(), 10);
    }

    #[test]
    fn test_evict_no_candidates() {
        let replacer = ClockReplacer::new(4);
        assert_eq!(replacer.evict(&|_| false), None);
    }

    #[test]
    fn test_evict_single_candidate() {
        let replacer = ClockReplacer::new(4);
        let victim = replacer.evict(&|f| f == FrameId(2));
        assert_eq!(victim, Some(FrameId(2)));
    }

    #[test]
    fn test_referenced_frames_get_second_chance() {
        let replacer = ClockReplacer::new(3);

        replacer.record_access(FrameId(0));
        replacer.record_access(FrameId(1));

        // Frame 2 has no reference bit, so the first sweep picks it.
        let victim = replacer.evict(&|_| true);
        assert_eq!(victim, Some(FrameId(2)));
    }

    #[test]
    fn test_all_referenced_still_evicts() {
        let replacer = ClockReplacer::new(3);

        for i in 0..3 {
            replacer.record_access(FrameId(i));
        }

        // First sweep clears all bits, second sweep finds a victim.
        assert!(replacer.evict(&|_| true).is_some());
    }

    #[test]
    fn test_remove_clears_reference() {
        let replacer = ClockReplacer::new(2);

        replacer.record_access(FrameId(0));
        replacer.remove(FrameId(0));

        // Frame 0 lost its second chance.
        let victim = replacer.evict(&|f| f == FrameId(0));
        assert_eq!(victim, Some(FrameId(0)));
    }

    #[test]
    fn test_out_of_bounds_ignored() {
        let replacer = ClockReplacer::new(2);

        // Should not panic.
        replacer.record_access(FrameId(100));
        replacer.remove(FrameId(100));
    }

    #[test]
    fn test_empty_replacer() {
        let replacer = ClockReplacer::new(0);
        assert_eq!(replacer.evict(&|_| true), None);
    }
}
