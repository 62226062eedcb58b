//! Deterministic metric naming.
//!
//! Every instrument a signature can own is addressed by a [`MetricName`]
//! built from the signature, a sub-type and an instrument kind. The eviction
//! path relies on being able to recompute the whole set from the signature
//! alone.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Instrument kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Meter,
    Timer,
    Gauge,
}

/// Sub-type distinguishing all calls from failed calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricSubType {
    Default,
    Error,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Meter => "meter",
            MetricKind::Timer => "timer",
            MetricKind::Gauge => "gauge",
        }
    }
}

impl MetricSubType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricSubType::Default => "default",
            MetricSubType::Error => "error",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for MetricSubType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry key of one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricName {
    key: Arc<str>,
    sub_type: MetricSubType,
    kind: MetricKind,
}

impl MetricName {
    pub fn new(key: impl Into<Arc<str>>, sub_type: MetricSubType, kind: MetricKind) -> Self {
        Self {
            key: key.into(),
            sub_type,
            kind,
        }
    }

    /// The signature (or other grouping key) this instrument belongs to
    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[inline]
    pub fn sub_type(&self) -> MetricSubType {
        self.sub_type
    }

    #[inline]
    pub fn kind(&self) -> MetricKind {
        self.kind
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.key, self.sub_type, self.kind)
    }
}

/// Builds the names of a signature's metric family.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricNameFactory;

impl MetricNameFactory {
    pub const fn new() -> Self {
        MetricNameFactory
    }

    pub fn counter_name(&self, key: &Arc<str>, sub_type: MetricSubType) -> MetricName {
        MetricName::new(Arc::clone(key), sub_type, MetricKind::Counter)
    }

    pub fn meter_name(&self, key: &Arc<str>, sub_type: MetricSubType) -> MetricName {
        MetricName::new(Arc::clone(key), sub_type, MetricKind::Meter)
    }

    pub fn timer_name(&self, key: &Arc<str>, sub_type: MetricSubType) -> MetricName {
        MetricName::new(Arc::clone(key), sub_type, MetricKind::Timer)
    }

    pub fn gauge_name(&self, key: &Arc<str>, sub_type: MetricSubType) -> MetricName {
        MetricName::new(Arc::clone(key), sub_type, MetricKind::Gauge)
    }

    /// All six names a family for `key` may have registered.
    pub fn family_names(&self, key: &Arc<str>) -> [MetricName; 6] {
        [
            self.counter_name(key, MetricSubType::Default),
            self.counter_name(key, MetricSubType::Error),
            self.meter_name(key, MetricSubType::Default),
            self.meter_name(key, MetricSubType::Error),
            self.timer_name(key, MetricSubType::Default),
            self.gauge_name(key, MetricSubType::Default),
        ]
    }
}
