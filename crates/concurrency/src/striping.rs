//! Fixed-size lock striping
//!
//! Maps an unbounded key space onto a bounded array of mutexes by
//! `hash(key) % stripes`. Unrelated keys may share a stripe (false
//! contention); the same key always maps to the same stripe.

use parking_lot::{Mutex, MutexGuard};
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};

/// Array of mutexes selected by key hash
#[derive(Debug)]
pub struct StripedLocks {
    stripes: Box<[Mutex<()>]>,
}

impl StripedLocks {
    /// Create `count` stripes (at least one)
    pub fn new(count: usize) -> Self {
        let stripes = (0..count.max(1)).map(|_| Mutex::new(())).collect();
        Self { stripes }
    }

    /// Number of stripes
    pub fn len(&self) -> usize {
        self.stripes.len()
    }

    /// Always false; there is at least one stripe
    pub fn is_empty(&self) -> bool {
        self.stripes.is_empty()
    }

    /// Stripe index for a key
    pub fn stripe_of<K: Hash + ?Sized>(&self, key: &K) -> usize {
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }

    /// Lock the stripe owning `key`
    pub fn lock<K: Hash + ?Sized>(&self, key: &K) -> MutexGuard<'_, ()> {
        self.stripes[self.stripe_of(key)].lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_key_same_stripe() {
        let locks = StripedLocks::new(128);
        assert_eq!(locks.stripe_of("term-a"), locks.stripe_of("term-a"));
        assert!(locks.stripe_of("term-b") < 128);
    }

    #[test]
    fn test_zero_stripes_rounds_up() {
        let locks = StripedLocks::new(0);
        assert_eq!(locks.len(), 1);
        let _guard = locks.lock(&42u32);
    }

    #[test]
    fn test_lock_excludes_same_key() {
        let locks = StripedLocks::new(4);
        let guard = locks.lock(&7u64);
        assert!(locks.stripes[locks.stripe_of(&7u64)].try_lock().is_none());
        drop(guard);
        assert!(locks.stripes[locks.stripe_of(&7u64)].try_lock().is_some());
    }
}
