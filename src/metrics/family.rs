//! Signature-keyed metric families and their bounded lifecycle.
//!
//! A [`MetricFamily`] is created the first time a signature is observed and
//! registers its instruments in the shared [`MetricRegistry`]. The
//! [`SignatureMetrics`] manager records every observed signature in a
//! [`SignatureCache`]; when the cache evicts one, the family is dropped and
//! all six names it may have registered are removed from the registry.
//!
//! Eviction and updates for the same signature are serialized on the
//! family-map shard that holds it: updates run under the shard's read lock,
//! creation and eviction under its write lock. An update racing with eviction
//! therefore lands entirely before it (and is discarded with the family) or
//! entirely after it (and starts a fresh family). A stale instrument is never
//! resurrected in the registry.

use crate::core::{Result, WeftError};
use crate::metrics::cache::{CacheStats, RemovalCause, RemovalListener, SignatureCache};
use crate::metrics::instruments::{Counter, Gauge, GaugeValue, Meter, Timer};
use crate::metrics::name::{MetricNameFactory, MetricSubType};
use crate::metrics::registry::MetricRegistry;
use crate::metrics::signature::Signature;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Instruments owned by one signature.
///
/// Default instruments are registered on creation; the error counter and
/// error meter are registered on the first failed call.
#[derive(Debug)]
pub struct MetricFamily {
    signature: Signature,
    counter: Arc<Counter>,
    meter: Arc<Meter>,
    timer: Arc<Timer>,
    gauge: Arc<Gauge>,
    error_counter: OnceCell<Arc<Counter>>,
    error_meter: OnceCell<Arc<Meter>>,
}

impl MetricFamily {
    fn register(
        registry: &MetricRegistry,
        names: &MetricNameFactory,
        signature: &Signature,
    ) -> Result<Self> {
        let key = signature.as_arc();
        let counter = registry.counter(&names.counter_name(key, MetricSubType::Default))?;
        let meter = registry.meter(&names.meter_name(key, MetricSubType::Default))?;
        let timer = registry.timer(&names.timer_name(key, MetricSubType::Default))?;

        let source = Arc::clone(&meter);
        let gauge = registry.gauge(&names.gauge_name(key, MetricSubType::Default), move || {
            Gauge::new(move || GaugeValue::last_minutes(&source.snapshot()))
        })?;

        Ok(Self {
            signature: signature.clone(),
            counter,
            meter,
            timer,
            gauge,
            error_counter: OnceCell::new(),
            error_meter: OnceCell::new(),
        })
    }

    fn record(
        &self,
        registry: &MetricRegistry,
        names: &MetricNameFactory,
        elapsed: Duration,
        failed: bool,
    ) -> Result<()> {
        self.counter.inc();
        self.meter.mark();
        self.timer.update(elapsed);

        if failed {
            let key = self.signature.as_arc();
            self.error_counter
                .get_or_try_init(|| registry.counter(&names.counter_name(key, MetricSubType::Error)))?
                .inc();
            self.error_meter
                .get_or_try_init(|| registry.meter(&names.meter_name(key, MetricSubType::Error)))?
                .mark();
        }
        Ok(())
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Completed calls
    pub fn count(&self) -> u64 {
        self.counter.count()
    }

    /// Failed calls
    pub fn error_count(&self) -> u64 {
        self.error_counter.get().map_or(0, |c| c.count())
    }

    pub fn timer(&self) -> &Arc<Timer> {
        &self.timer
    }

    pub fn meter(&self) -> &Arc<Meter> {
        &self.meter
    }

    pub fn gauge(&self) -> &Arc<Gauge> {
        &self.gauge
    }
}

/// Family map shared between the recording path and the eviction listener.
#[derive(Debug)]
struct FamilyStore {
    registry: Arc<MetricRegistry>,
    names: MetricNameFactory,
    families: DashMap<Signature, Arc<MetricFamily>>,
}

impl FamilyStore {
    fn record(&self, signature: &Signature, elapsed: Duration, failed: bool) -> Result<()> {
        if let Some(family) = self.families.get(signature) {
            return family.record(&self.registry, &self.names, elapsed, failed);
        }

        let family = self.families.entry(signature.clone()).or_try_insert_with(|| {
            trace!(signature = %signature, "creating metric family");
            MetricFamily::register(&self.registry, &self.names, signature).map(Arc::new)
        })?;
        family.record(&self.registry, &self.names, elapsed, failed)
    }

    /// Drop the family and attempt removal of all six names.
    fn reclaim(&self, signature: &Signature) {
        // Holding the entry keeps creation and updates for this signature out
        match self.families.entry(signature.clone()) {
            Entry::Occupied(entry) => {
                self.unregister(signature);
                entry.remove();
            },
            Entry::Vacant(_) => self.unregister(signature),
        }
    }

    fn unregister(&self, signature: &Signature) {
        let mut removed = 0usize;
        for name in &self.names.family_names(signature.as_arc()) {
            if self.registry.remove(name) {
                removed += 1;
            }
        }
        debug!(signature = %signature, removed, "reclaimed metric family");
    }
}

/// Removal listener wired into the signature cache.
struct Reclaimer {
    store: Arc<FamilyStore>,
}

impl RemovalListener for Reclaimer {
    fn on_removal(&self, signature: &Signature, cause: RemovalCause) {
        trace!(signature = %signature, ?cause, "signature left the cache");
        self.store.reclaim(signature);
    }
}

/// Bounded lifecycle manager for signature-keyed metric families.
pub struct SignatureMetrics {
    store: Arc<FamilyStore>,
    cache: SignatureCache<Reclaimer>,
}

impl SignatureMetrics {
    /// Track at most `capacity` live signatures in `registry`
    pub fn new(registry: Arc<MetricRegistry>, capacity: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity)
            .ok_or_else(|| WeftError::config("signature cache capacity must be greater than 0"))?;

        let store = Arc::new(FamilyStore {
            registry,
            names: MetricNameFactory::new(),
            families: DashMap::new(),
        });
        let cache = SignatureCache::new(
            capacity,
            Reclaimer {
                store: Arc::clone(&store),
            },
        );

        Ok(Self { store, cache })
    }

    /// Record one completed call for `signature`, then mark it live.
    ///
    /// Marking may evict the least recently used other signature, whose
    /// family is reclaimed on this thread before returning.
    pub fn record(&self, signature: &Signature, elapsed: Duration, failed: bool) -> Result<()> {
        let result = self.store.record(signature, elapsed, failed);
        self.cache.touch(signature);
        result
    }

    /// Reclaim one signature immediately
    pub fn evict(&self, signature: &Signature) {
        if !self.cache.invalidate(signature) {
            self.store.reclaim(signature);
        }
    }

    /// Reclaim every live signature
    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    pub fn family(&self, signature: &Signature) -> Option<Arc<MetricFamily>> {
        self.store
            .families
            .get(signature)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.store.registry
    }

    pub fn is_live(&self, signature: &Signature) -> bool {
        self.cache.contains(signature)
    }

    /// Live signatures, most recently used first
    pub fn live_signatures(&self) -> Vec<Signature> {
        self.cache.signatures()
    }

    pub fn capacity(&self) -> usize {
        self.cache.capacity()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Number of families currently holding instruments
    pub fn family_count(&self) -> usize {
        self.store.families.len()
    }
}
