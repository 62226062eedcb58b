//! Thread-safe metric registry.
//!
//! Maps [`MetricName`] to a shared instrument. Get-or-create is atomic per
//! name (`DashMap` entry API), so concurrent callers always receive the same
//! instrument and no update is lost to a duplicate.

use crate::core::{Result, WeftError};
use crate::metrics::instruments::{
    Counter, Gauge, GaugeValue, Meter, MeterSnapshot, Timer, TimerSnapshot,
};
use crate::metrics::name::{MetricKind, MetricName};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A registered instrument.
#[derive(Debug, Clone)]
pub enum Metric {
    Counter(Arc<Counter>),
    Meter(Arc<Meter>),
    Timer(Arc<Timer>),
    Gauge(Arc<Gauge>),
}

impl Metric {
    pub fn kind(&self) -> MetricKind {
        match self {
            Metric::Counter(_) => MetricKind::Counter,
            Metric::Meter(_) => MetricKind::Meter,
            Metric::Timer(_) => MetricKind::Timer,
            Metric::Gauge(_) => MetricKind::Gauge,
        }
    }

    fn snapshot(&self) -> MetricSnapshot {
        match self {
            Metric::Counter(c) => MetricSnapshot::Counter { count: c.count() },
            Metric::Meter(m) => MetricSnapshot::Meter(m.snapshot()),
            Metric::Timer(t) => MetricSnapshot::Timer(t.snapshot()),
            Metric::Gauge(g) => MetricSnapshot::Gauge(g.value()),
        }
    }
}

/// Point-in-time value of one instrument.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricSnapshot {
    Counter { count: u64 },
    Meter(MeterSnapshot),
    Timer(TimerSnapshot),
    Gauge(GaugeValue),
}

/// Point-in-time copy of a whole registry, ordered by name.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    metrics: BTreeMap<MetricName, MetricSnapshot>,
}

impl RegistrySnapshot {
    pub fn get(&self, name: &MetricName) -> Option<&MetricSnapshot> {
        self.metrics.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MetricName, &MetricSnapshot)> {
        self.metrics.iter()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

/// Process-wide store of named instruments.
#[derive(Debug, Default)]
pub struct MetricRegistry {
    metrics: DashMap<MetricName, Metric>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the counter registered under `name`
    pub fn counter(&self, name: &MetricName) -> Result<Arc<Counter>> {
        match self.get_or_insert_with(name, MetricKind::Counter, || {
            Metric::Counter(Arc::new(Counter::new()))
        })? {
            Metric::Counter(counter) => Ok(counter),
            other => Err(mismatch(name, MetricKind::Counter, other.kind())),
        }
    }

    /// Get or create the meter registered under `name`
    pub fn meter(&self, name: &MetricName) -> Result<Arc<Meter>> {
        match self.get_or_insert_with(name, MetricKind::Meter, || {
            Metric::Meter(Arc::new(Meter::new()))
        })? {
            Metric::Meter(meter) => Ok(meter),
            other => Err(mismatch(name, MetricKind::Meter, other.kind())),
        }
    }

    /// Get or create the timer registered under `name`
    pub fn timer(&self, name: &MetricName) -> Result<Arc<Timer>> {
        match self.get_or_insert_with(name, MetricKind::Timer, || {
            Metric::Timer(Arc::new(Timer::new()))
        })? {
            Metric::Timer(timer) => Ok(timer),
            other => Err(mismatch(name, MetricKind::Timer, other.kind())),
        }
    }

    /// Get the gauge registered under `name`, creating it from `make` if absent
    pub fn gauge(&self, name: &MetricName, make: impl FnOnce() -> Gauge) -> Result<Arc<Gauge>> {
        match self.get_or_insert_with(name, MetricKind::Gauge, || {
            Metric::Gauge(Arc::new(make()))
        })? {
            Metric::Gauge(gauge) => Ok(gauge),
            other => Err(mismatch(name, MetricKind::Gauge, other.kind())),
        }
    }

    /// Remove an instrument; returns false when `name` was not registered
    pub fn remove(&self, name: &MetricName) -> bool {
        self.metrics.remove(name).is_some()
    }

    pub fn contains(&self, name: &MetricName) -> bool {
        self.metrics.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn names(&self) -> Vec<MetricName> {
        self.metrics.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Copy the current value of every instrument.
    ///
    /// Instruments are read one at a time; an update racing with the
    /// snapshot may be observed partially.
    pub fn snapshot(&self) -> RegistrySnapshot {
        // Clone the handles first so no shard lock is held while reading
        let handles: Vec<(MetricName, Metric)> = self
            .metrics
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        RegistrySnapshot {
            metrics: handles
                .into_iter()
                .map(|(name, metric)| {
                    let snapshot = metric.snapshot();
                    (name, snapshot)
                })
                .collect(),
        }
    }

    fn get_or_insert_with(
        &self,
        name: &MetricName,
        expected: MetricKind,
        make: impl FnOnce() -> Metric,
    ) -> Result<Metric> {
        if name.kind() != expected {
            return Err(mismatch(name, expected, name.kind()));
        }

        if let Some(existing) = self.metrics.get(name) {
            return Ok(existing.value().clone());
        }

        Ok(self
            .metrics
            .entry(name.clone())
            .or_insert_with(make)
            .value()
            .clone())
    }
}

fn mismatch(name: &MetricName, expected: MetricKind, found: MetricKind) -> WeftError {
    WeftError::MetricKindMismatch {
        name: name.to_string(),
        expected,
        found,
    }
}
