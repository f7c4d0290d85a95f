//! Deduplication Cache
//!
//! Bounded set of fingerprints already seen by one interceptor. Eviction
//! is bulk and unordered: once the set grows past its capacity, a single
//! pass drops entries until roughly half the capacity remains. There is no
//! recency tracking, so a fingerprint may be forgotten while still useful;
//! the only promise is that the set never grows past its capacity.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::fingerprint::Fingerprint;

/// Default high-water mark
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// Thread-safe, bounded fingerprint set
#[derive(Debug)]
pub struct DedupCache {
    entries: Mutex<HashSet<Fingerprint>>,
    capacity: usize,
    evictions: AtomicU64,
}

impl DedupCache {
    /// Create a cache holding at most `capacity` fingerprints (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(HashSet::with_capacity(capacity.min(DEFAULT_CACHE_CAPACITY) + 1)),
            capacity,
            evictions: AtomicU64::new(0),
        }
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.lock().contains(fingerprint)
    }

    /// Mark a fingerprint as seen
    pub fn insert(&self, fingerprint: Fingerprint) {
        let mut entries = self.lock();
        if entries.insert(fingerprint) {
            self.evict_if_full(&mut entries, fingerprint);
        }
    }

    /// Return whether `fingerprint` was already present, marking it if not
    ///
    /// Test and insert share one critical section, so concurrent callers
    /// with the same fingerprint see exactly one `false`.
    pub fn check_and_mark(&self, fingerprint: Fingerprint) -> bool {
        let mut entries = self.lock();
        if entries.contains(&fingerprint) {
            return true;
        }
        entries.insert(fingerprint);
        self.evict_if_full(&mut entries, fingerprint);
        false
    }

    /// Forget a fingerprint; returns whether it was present
    pub fn remove(&self, fingerprint: &Fingerprint) -> bool {
        self.lock().remove(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total entries evicted since creation
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<Fingerprint>> {
        // Presence flags only, so a poisoned set is still valid
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn evict_if_full(&self, entries: &mut HashSet<Fingerprint>, fresh: Fingerprint) {
        if entries.len() <= self.capacity {
            return;
        }

        let before = entries.len();
        let mut keep = self.capacity / 2;
        entries.retain(|fp| {
            if *fp == fresh {
                return true;
            }
            if keep > 0 {
                keep -= 1;
                true
            } else {
                false
            }
        });

        let evicted = before - entries.len();
        self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        tracing::debug!(
            "Dedup cache over capacity {}, evicted {} fingerprints ({} remain)",
            self.capacity,
            evicted,
            entries.len()
        );
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}
