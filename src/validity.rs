//! Process-wide cache validity flag
//!
//! Two states: valid (initial) and invalid. Every successful write flips the
//! flag to invalid and bumps the generation; only an explicit rehydration flips
//! it back. Reads never revalidate, and nothing expires on a timer.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[derive(Debug)]
pub struct CacheValidity {
    valid: AtomicBool,
    generation: AtomicU64,
}

impl Default for CacheValidity {
    fn default() -> Self {
        Self {
            valid: AtomicBool::new(true),
            generation: AtomicU64::new(0),
        }
    }
}

impl CacheValidity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether memory cache hits may be trusted
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Number of invalidations seen by this process
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Mark memory contents untrusted. Returns the new generation.
    pub fn invalidate(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.valid.store(false, Ordering::Release);
        generation
    }

    /// Mark memory contents trusted again, unless an invalidation landed after
    /// `observed_generation` was read. Returns whether the flag is now valid.
    pub(crate) fn revalidate(&self, observed_generation: u64) -> bool {
        if self.generation() != observed_generation {
            return false;
        }
        self.valid.store(true, Ordering::Release);
        // An invalidation may have raced the store above
        if self.generation() != observed_generation {
            self.valid.store(false, Ordering::Release);
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_valid() {
        let validity = CacheValidity::new();
        assert!(validity.is_valid());
        assert_eq!(validity.generation(), 0);
    }

    #[test]
    fn test_invalidate_then_revalidate() {
        let validity = CacheValidity::new();
        assert_eq!(validity.invalidate(), 1);
        assert!(!validity.is_valid());
        assert_eq!(validity.invalidate(), 2);

        assert!(validity.revalidate(2));
        assert!(validity.is_valid());
    }

    #[test]
    fn test_stale_revalidation_is_refused() {
        let validity = CacheValidity::new();
        let observed = validity.invalidate();
        validity.invalidate();

        assert!(!validity.revalidate(observed));
        assert!(!validity.is_valid());
    }
}
