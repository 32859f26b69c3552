//! Lazily computed raster caches with hit/miss accounting.
//!
//! Every derived image in the document (composition composite, isolated
//! group image, group thumbnail) lives in a [`CachedFrame`]. Rendering only
//! needs `&self`, so the slot uses interior mutability; all mutation of the
//! document itself still goes through `&mut Project`.

use std::cell::{Cell, RefCell};

use super::frame::Frame;

/// Snapshot of hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn total(&self) -> u64 {
        self.hits + self.misses
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 { 0.0 } else { self.hits as f64 / total as f64 }
    }
}

#[derive(Debug, Default)]
pub struct CachedFrame {
    slot: RefCell<Option<Frame>>,
    hits: Cell<u64>,
    misses: Cell<u64>,
}

impl CachedFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached frame or compute, store and return it.
    ///
    /// The slot is not borrowed while `compute` runs, so computing one cache
    /// may freely read others.
    pub fn get_or_compute(&self, compute: impl FnOnce() -> Frame) -> Frame {
        if let Some(frame) = self.slot.borrow().as_ref() {
            self.hits.set(self.hits.get() + 1);
            return frame.clone();
        }
        self.misses.set(self.misses.get() + 1);
        let frame = compute();
        *self.slot.borrow_mut() = Some(frame.clone());
        frame
    }

    /// Drop the cached frame. Returns whether something was cached.
    pub fn invalidate(&self) -> bool {
        self.slot.borrow_mut().take().is_some()
    }

    pub fn peek(&self) -> Option<Frame> {
        self.slot.borrow().clone()
    }

    pub fn is_cached(&self) -> bool {
        self.slot.borrow().is_some()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats { hits: self.hits.get(), misses: self.misses.get() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_once_until_invalidated() {
        let cache = CachedFrame::new();
        let mut calls = 0;
        for _ in 0..3 {
            cache.get_or_compute(|| {
                calls += 1;
                Frame::transparent(2, 2)
            });
        }
        assert_eq!(calls, 1);
        assert_eq!(cache.stats(), CacheStats { hits: 2, misses: 1 });

        assert!(cache.invalidate());
        assert!(!cache.invalidate());
        cache.get_or_compute(|| Frame::transparent(2, 2));
        assert_eq!(cache.stats().misses, 2);
    }

    #[test]
    fn test_hit_rate() {
        let s = CacheStats { hits: 3, misses: 1 };
        assert!((s.hit_rate() - 0.75).abs() < 1e-9);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
