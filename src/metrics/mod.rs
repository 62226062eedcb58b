//! Signature-keyed metrics with a bounded lifecycle.
//!
//! Every observed signature owns a [`MetricFamily`] of instruments in a
//! shared [`MetricRegistry`]. A [`SignatureCache`] bounds how many
//! signatures stay live; evicting one removes its family from the registry.
//! An [`AutoRefreshReporter`] periodically converts the registry into report
//! records.

pub mod cache;
pub mod converter;
pub mod family;
pub mod instruments;
pub mod interceptor;
pub mod name;
pub mod registry;
pub mod reporter;
pub mod signature;

pub use cache::{CacheStats, RemovalCause, RemovalListener, SignatureCache};
pub use converter::{AdditionalAttributes, Converter, KeyedConverter};
pub use family::{MetricFamily, SignatureMetrics};
pub use instruments::{Counter, Gauge, GaugeValue, Meter, MeterSnapshot, Timer, TimerSnapshot};
pub use interceptor::{extract, KeyExtractor, SignatureMetricInterceptor};
pub use name::{MetricKind, MetricName, MetricNameFactory, MetricSubType};
pub use registry::{Metric, MetricRegistry, MetricSnapshot, RegistrySnapshot};
pub use reporter::{AutoRefreshReporter, MetricsCollectorConfig};
pub use signature::{Signature, SignatureDeriver, SqlCompression};
