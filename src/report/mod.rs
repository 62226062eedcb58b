//! Report sinks: where converted metric payloads go.
//!
//! Delivery is best effort. A sink error costs that cycle's payload only;
//! the reporter logs it and carries on.

use crate::core::{Result, WeftError};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

/// One report cycle's output for one extension point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricItem {
    /// Extension point the records belong to
    pub key: String,
    /// One record per signature
    pub records: Vec<Value>,
}

impl MetricItem {
    pub fn new(key: impl Into<String>, records: Vec<Value>) -> Self {
        Self {
            key: key.into(),
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record whose `field` equals `value`
    pub fn find(&self, field: &str, value: &str) -> Option<&Value> {
        self.records
            .iter()
            .find(|record| record.get(field).and_then(Value::as_str) == Some(value))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Destination for report payloads.
pub trait ReportSink: Send + Sync {
    fn report(&self, item: MetricItem) -> Result<()>;
}

impl<F> ReportSink for F
where
    F: Fn(MetricItem) -> Result<()> + Send + Sync,
{
    fn report(&self, item: MetricItem) -> Result<()> {
        self(item)
    }
}

/// Writes each payload to the log at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReportSink;

impl LogReportSink {
    pub fn new() -> Self {
        Self
    }
}

impl ReportSink for LogReportSink {
    fn report(&self, item: MetricItem) -> Result<()> {
        let payload = item.to_json()?;
        info!(key = %item.key, records = item.len(), %payload, "metrics report");
        Ok(())
    }
}

/// Forwards payloads to a crossbeam channel.
#[derive(Debug, Clone)]
pub struct ChannelReportSink {
    tx: Sender<MetricItem>,
}

impl ChannelReportSink {
    /// Unbounded channel
    pub fn unbounded() -> (Self, Receiver<MetricItem>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx }, rx)
    }

    /// Bounded channel; a full channel drops the payload with an error
    pub fn bounded(capacity: usize) -> (Self, Receiver<MetricItem>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        (Self { tx }, rx)
    }
}

impl ReportSink for ChannelReportSink {
    fn report(&self, item: MetricItem) -> Result<()> {
        match self.tx.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(item)) => Err(WeftError::report(format!(
                "report channel full, dropped {} records for '{}'",
                item.len(),
                item.key
            ))),
            Err(TrySendError::Disconnected(_)) => Err(WeftError::ChannelSend),
        }
    }
}
