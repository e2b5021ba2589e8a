//! Worker slot pool.
//!
//! Tracks which of the fixed worker slots are busy. Slots are indexed from 0
//! internally; everything user-facing (logs, manage commands) numbers them
//! from 1.

use rand::seq::SliceRandom;

/// Fixed-size pool of worker slots.
#[derive(Debug)]
pub struct SlotPool {
    slots: Vec<bool>,
}

impl SlotPool {
    /// Create a pool of `size` free slots.
    pub fn new(size: usize) -> Self {
        Self {
            slots: vec![false; size],
        }
    }

    /// Total number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Pick a free slot uniformly at random, so repeated dispatches spread
    /// across workers instead of reusing the lowest index.
    pub fn get_free(&self) -> Option<usize> {
        let free: Vec<usize> = (0..self.slots.len()).filter(|i| !self.slots[*i]).collect();
        free.choose(&mut rand::thread_rng()).copied()
    }

    /// Lowest free slot index, for callers that want determinism.
    pub fn first_free(&self) -> Option<usize> {
        self.slots.iter().position(|busy| !busy)
    }

    /// Mark a slot busy. The index must be below `len`.
    pub fn mark_busy(&mut self, index: usize) {
        self.slots[index] = true;
    }

    /// Mark a slot free. The index must be below `len`.
    pub fn mark_free(&mut self, index: usize) {
        self.slots[index] = false;
    }

    pub fn is_busy(&self, index: usize) -> bool {
        self.slots[index]
    }

    pub fn count_free(&self) -> usize {
        self.slots.iter().filter(|busy| !**busy).count()
    }

    pub fn count_busy(&self) -> usize {
        self.slots.iter().filter(|busy| **busy).count()
    }

    /// True when no slot is busy. Vacuously true for an empty pool.
    pub fn all_free(&self) -> bool {
        self.slots.iter().all(|busy| !busy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_pool_is_all_free() {
        let pool = SlotPool::new(4);
        assert_eq!(pool.len(), 4);
        assert_eq!(pool.count_free(), 4);
        assert_eq!(pool.count_busy(), 0);
        assert!(pool.all_free());
    }

    #[test]
    fn marking_busy_and_free_updates_counts() {
        let mut pool = SlotPool::new(3);
        pool.mark_busy(1);
        assert!(pool.is_busy(1));
        assert!(!pool.is_busy(0));
        assert_eq!(pool.count_free(), 2);
        assert!(!pool.all_free());

        pool.mark_free(1);
        assert_eq!(pool.count_free(), 3);
        assert!(pool.all_free());
    }

    #[test]
    fn get_free_never_returns_a_busy_slot() {
        let mut pool = SlotPool::new(3);
        pool.mark_busy(0);
        pool.mark_busy(2);
        for _ in 0..50 {
            assert_eq!(pool.get_free(), Some(1));
        }
    }

    #[test]
    fn get_free_exhausts_to_none() {
        let mut pool = SlotPool::new(2);
        pool.mark_busy(0);
        pool.mark_busy(1);
        assert_eq!(pool.get_free(), None);
        assert_eq!(pool.first_free(), None);
    }

    #[test]
    fn first_free_is_lowest_index() {
        let mut pool = SlotPool::new(3);
        pool.mark_busy(0);
        assert_eq!(pool.first_free(), Some(1));
    }

    #[test]
    fn get_free_spreads_across_slots() {
        let pool = SlotPool::new(4);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            if let Some(slot) = pool.get_free() {
                seen.insert(slot);
            }
        }
        assert!(seen.len() > 1, "expected random spread, got {seen:?}");
    }

    #[test]
    fn empty_pool_is_degenerate_but_safe() {
        let pool = SlotPool::new(0);
        assert!(pool.is_empty());
        assert!(pool.all_free());
        assert_eq!(pool.get_free(), None);
    }
}
