//! Bounded LRU cache of live signatures.
//!
//! The cache stores no metric values. It only decides which signatures are
//! still "live" and tells a [`RemovalListener`] when one falls out, so the
//! listener can reclaim whatever it keyed on that signature.

use crate::metrics::signature::Signature;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Why a signature left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalCause {
    /// Evicted as least recently used to make room
    Size,
    /// Removed through `invalidate` or `invalidate_all`
    Explicit,
}

/// Receives removed signatures.
///
/// Called synchronously on the thread that caused the removal, after the
/// cache lock has been released.
pub trait RemovalListener: Send + Sync {
    fn on_removal(&self, signature: &Signature, cause: RemovalCause);
}

impl<F> RemovalListener for F
where
    F: Fn(&Signature, RemovalCause) + Send + Sync,
{
    fn on_removal(&self, signature: &Signature, cause: RemovalCause) {
        self(signature, cause)
    }
}

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Thread-safe, capacity-bounded presence cache with strict LRU eviction.
///
/// A lookup of a present signature refreshes its recency. When an insert
/// finds the cache full, the least recently used entry other than the one
/// being inserted is evicted.
pub struct SignatureCache<L: RemovalListener> {
    entries: Mutex<LruCache<Signature, ()>>,
    listener: L,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<L: RemovalListener> SignatureCache<L> {
    pub fn new(capacity: NonZeroUsize, listener: L) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            listener,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Mark `signature` as used, inserting it if absent.
    ///
    /// Returns true when the signature was already present.
    pub fn touch(&self, signature: &Signature) -> bool {
        let evicted = {
            let mut entries = self.entries.lock();
            if entries.get(signature).is_some() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return true;
            }
            self.misses.fetch_add(1, Ordering::Relaxed);
            entries.push(signature.clone(), ())
        };

        // push() hands back the displaced LRU entry when the cache was full
        if let Some((old, ())) = evicted {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            self.notify(&old, RemovalCause::Size);
        }
        false
    }

    /// Whether `signature` is live, without refreshing its recency
    pub fn contains(&self, signature: &Signature) -> bool {
        self.entries.lock().contains(signature)
    }

    /// Remove one signature and notify the listener if it was present
    pub fn invalidate(&self, signature: &Signature) -> bool {
        let removed = self.entries.lock().pop(signature).is_some();
        if removed {
            self.notify(signature, RemovalCause::Explicit);
        }
        removed
    }

    /// Remove every signature, notifying the listener for each
    pub fn invalidate_all(&self) {
        let drained: Vec<Signature> = {
            let mut entries = self.entries.lock();
            let mut drained = Vec::with_capacity(entries.len());
            while let Some((signature, ())) = entries.pop_lru() {
                drained.push(signature);
            }
            drained
        };

        for signature in &drained {
            self.notify(signature, RemovalCause::Explicit);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }

    /// Live signatures, most recently used first
    pub fn signatures(&self) -> Vec<Signature> {
        self.entries.lock().iter().map(|(k, ())| k.clone()).collect()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn notify(&self, signature: &Signature, cause: RemovalCause) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.listener.on_removal(signature, cause);
        }));
        if result.is_err() {
            warn!(signature = %signature, ?cause, "removal listener panicked");
        }
    }
}
