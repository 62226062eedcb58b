//! Turns registry snapshots into report records.

use crate::core::Config;
use crate::metrics::instruments::{GaugeValue, MeterSnapshot, TimerSnapshot};
use crate::metrics::name::MetricSubType;
use crate::metrics::registry::{MetricSnapshot, RegistrySnapshot};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Extra attributes computed once per report cycle.
pub type AttributeSupplier = Arc<dyn Fn() -> Map<String, Value> + Send + Sync>;

/// Attributes appended to every record.
///
/// The fixed part comes from configuration; the optional supplier is
/// evaluated each cycle and wins on key collisions.
#[derive(Clone, Default)]
pub struct AdditionalAttributes {
    fixed: Map<String, Value>,
    dynamic: Option<AttributeSupplier>,
}

impl fmt::Debug for AdditionalAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdditionalAttributes")
            .field("fixed", &self.fixed)
            .field("dynamic", &self.dynamic.is_some())
            .finish()
    }
}

impl AdditionalAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// `service`, `system`, `host_name` and the configured extra attributes
    pub fn from_config(config: &Config) -> Self {
        let mut attributes = Self::new()
            .with("service", config.service.name.as_str())
            .with("system", config.service.system.as_str())
            .with("host_name", host_name());
        for (key, value) in &config.metrics.attributes {
            attributes = attributes.with(key.as_str(), value.as_str());
        }
        attributes
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fixed.insert(key.into(), value.into());
        self
    }

    pub fn with_dynamic<F>(mut self, supplier: F) -> Self
    where
        F: Fn() -> Map<String, Value> + Send + Sync + 'static,
    {
        self.dynamic = Some(Arc::new(supplier));
        self
    }

    /// Fixed attributes merged with the supplier's current output
    pub fn resolve(&self) -> Map<String, Value> {
        let mut resolved = self.fixed.clone();
        if let Some(supplier) = &self.dynamic {
            resolved.extend(supplier());
        }
        resolved
    }
}

fn host_name() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Converts one registry snapshot into report records.
pub trait Converter: Send + Sync {
    fn convert(&self, snapshot: &RegistrySnapshot, attributes: &Map<String, Value>) -> Vec<Value>;
}

/// Emits one record per metric key, grouping the family's instruments.
#[derive(Debug, Clone)]
pub struct KeyedConverter {
    category: String,
    type_name: String,
    key_field: String,
}

#[derive(Default)]
struct Group<'a> {
    count: u64,
    error_count: u64,
    meter: Option<&'a MeterSnapshot>,
    error_meter: Option<&'a MeterSnapshot>,
    timer: Option<&'a TimerSnapshot>,
    gauge: Option<&'a GaugeValue>,
}

impl KeyedConverter {
    pub fn new(
        category: impl Into<String>,
        type_name: impl Into<String>,
        key_field: impl Into<String>,
    ) -> Self {
        Self {
            category: category.into(),
            type_name: type_name.into(),
            key_field: key_field.into(),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn key_field(&self) -> &str {
        &self.key_field
    }

    fn record(&self, key: &str, group: &Group<'_>, timestamp: i64, attributes: &Map<String, Value>) -> Value {
        let mut record = Map::new();
        record.insert("category".into(), json!(self.category));
        record.insert("type".into(), json!(self.type_name));
        record.insert(self.key_field.clone(), json!(key));
        record.insert("timestamp".into(), json!(timestamp));
        record.insert("cnt".into(), json!(group.count));
        record.insert("errcnt".into(), json!(group.error_count));

        let rates = group.meter.copied().unwrap_or_else(empty_rates);
        record.insert("m1".into(), json!(rates.m1_rate));
        record.insert("m5".into(), json!(rates.m5_rate));
        record.insert("m15".into(), json!(rates.m15_rate));
        record.insert("mean_rate".into(), json!(rates.mean_rate));

        let errors = group.error_meter.copied().unwrap_or_else(empty_rates);
        record.insert("m1err".into(), json!(errors.m1_rate));
        record.insert("m5err".into(), json!(errors.m5_rate));
        record.insert("m15err".into(), json!(errors.m15_rate));

        let (m1cnt, m5cnt, m15cnt) = match group.gauge {
            Some(GaugeValue::LastMinutes {
                m1_count,
                m5_count,
                m15_count,
            }) => (*m1_count, *m5_count, *m15_count),
            _ => (0.0, 0.0, 0.0),
        };
        record.insert("m1cnt".into(), json!(m1cnt));
        record.insert("m5cnt".into(), json!(m5cnt));
        record.insert("m15cnt".into(), json!(m15cnt));

        let timer = group.timer;
        let field = |pick: fn(&TimerSnapshot) -> f64| json!(timer.map_or(0.0, pick));
        record.insert("min".into(), field(|t| t.min));
        record.insert("max".into(), field(|t| t.max));
        record.insert("mean".into(), field(|t| t.mean));
        record.insert("p25".into(), field(|t| t.p25));
        record.insert("p50".into(), field(|t| t.p50));
        record.insert("p75".into(), field(|t| t.p75));
        record.insert("p95".into(), field(|t| t.p95));
        record.insert("p98".into(), field(|t| t.p98));
        record.insert("p99".into(), field(|t| t.p99));
        record.insert("p999".into(), field(|t| t.p999));

        for (name, value) in attributes {
            record.entry(name.clone()).or_insert_with(|| value.clone());
        }
        Value::Object(record)
    }
}

fn empty_rates() -> MeterSnapshot {
    MeterSnapshot {
        count: 0,
        m1_rate: 0.0,
        m5_rate: 0.0,
        m15_rate: 0.0,
        mean_rate: 0.0,
    }
}

impl Converter for KeyedConverter {
    fn convert(&self, snapshot: &RegistrySnapshot, attributes: &Map<String, Value>) -> Vec<Value> {
        let mut groups: BTreeMap<&str, Group<'_>> = BTreeMap::new();

        for (name, value) in snapshot.iter() {
            let group = groups.entry(name.key()).or_default();
            match (name.sub_type(), value) {
                (MetricSubType::Default, MetricSnapshot::Counter { count }) => group.count = *count,
                (MetricSubType::Error, MetricSnapshot::Counter { count }) => group.error_count = *count,
                (MetricSubType::Default, MetricSnapshot::Meter(m)) => group.meter = Some(m),
                (MetricSubType::Error, MetricSnapshot::Meter(m)) => group.error_meter = Some(m),
                (_, MetricSnapshot::Timer(t)) => group.timer = Some(t),
                (_, MetricSnapshot::Gauge(g)) => group.gauge = Some(g),
            }
        }

        let timestamp = chrono::Utc::now().timestamp_millis();
        groups
            .iter()
            .map(|(key, group)| self.record(key, group, timestamp, attributes))
            .collect()
    }
}
