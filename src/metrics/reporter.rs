//! Periodic background reporting of a registry.

use crate::core::{Config, Result, WeftError};
use crate::metrics::converter::{AdditionalAttributes, Converter};
use crate::metrics::registry::MetricRegistry;
use crate::report::{MetricItem, ReportSink};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::{self, JoinHandle};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

/// Resolved reporting settings for one extension point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsCollectorConfig {
    key: String,
    enabled: bool,
    interval: Duration,
    flush_on_stop: bool,
}

impl MetricsCollectorConfig {
    /// Per-point overrides, falling back to the global metrics settings
    pub fn new(config: &Config, key: &str) -> Self {
        Self {
            key: key.to_string(),
            enabled: config.metrics_enabled_for(key),
            interval: config.interval_for(key),
            flush_on_stop: config.metrics.flush_on_stop,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_flush_on_stop(mut self, flush: bool) -> Self {
        self.flush_on_stop = flush;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn flush_on_stop(&self) -> bool {
        self.flush_on_stop
    }
}

/// Everything one report cycle needs, shared with the background task.
struct Cycle {
    config: MetricsCollectorConfig,
    registry: Arc<MetricRegistry>,
    converter: Arc<dyn Converter>,
    attributes: AdditionalAttributes,
    sink: Arc<dyn ReportSink>,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl Cycle {
    fn report(&self) -> Result<Option<usize>> {
        if !self.config.enabled {
            trace!(key = %self.config.key, "metrics disabled, skipping cycle");
            return Ok(None);
        }

        let snapshot = self.registry.snapshot();
        if snapshot.is_empty() {
            trace!(key = %self.config.key, "registry empty, nothing to report");
            return Ok(None);
        }

        let records = self.converter.convert(&snapshot, &self.attributes.resolve());
        if records.is_empty() {
            return Ok(None);
        }

        let count = records.len();
        self.sink.report(MetricItem::new(self.config.key.as_str(), records))?;
        self.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(Some(count))
    }

    /// One scheduled firing; failures are logged and the cycle is dropped
    fn tick(&self) {
        match self.report() {
            Ok(Some(records)) => debug!(key = %self.config.key, records, "reported metrics"),
            Ok(None) => {},
            Err(err) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    key = %self.config.key,
                    category = err.category(),
                    error = %err,
                    "report cycle failed"
                );
            },
        }
    }
}

enum State {
    Idle,
    Running {
        shutdown: watch::Sender<bool>,
        handle: JoinHandle<()>,
    },
    Stopped,
}

/// Snapshots a registry on a fixed interval and hands the converted payload
/// to a sink.
///
/// Started at most once; the first cycle fires one full interval after
/// [`run`](Self::run).
pub struct AutoRefreshReporter {
    cycle: Arc<Cycle>,
    state: Mutex<State>,
}

impl AutoRefreshReporter {
    pub fn new(
        config: MetricsCollectorConfig,
        registry: Arc<MetricRegistry>,
        converter: Arc<dyn Converter>,
        attributes: AdditionalAttributes,
        sink: Arc<dyn ReportSink>,
    ) -> Self {
        Self {
            cycle: Arc::new(Cycle {
                config,
                registry,
                converter,
                attributes,
                sink,
                delivered: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
            state: Mutex::new(State::Idle),
        }
    }

    pub fn key(&self) -> &str {
        &self.cycle.config.key
    }

    pub fn config(&self) -> &MetricsCollectorConfig {
        &self.cycle.config
    }

    /// Start the background task on the current tokio runtime
    pub fn run(&self) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            State::Idle => {},
            State::Running { .. } => {
                return Err(WeftError::ReporterAlreadyStarted(self.key().to_string()))
            },
            State::Stopped => return Err(WeftError::ReporterStopped(self.key().to_string())),
        }

        let period = self.cycle.config.interval;
        if period.is_zero() {
            return Err(WeftError::config(format!(
                "report interval for '{}' must be greater than 0",
                self.key()
            )));
        }

        let runtime = Handle::try_current().map_err(|_| WeftError::NoRuntime)?;
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let cycle = Arc::clone(&self.cycle);

        let handle = runtime.spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let current = Arc::clone(&cycle);
                        if let Err(err) = task::spawn_blocking(move || current.tick()).await {
                            warn!(key = %cycle.config.key, error = %err, "report cycle aborted");
                        }
                    }
                }
            }
            debug!(key = %cycle.config.key, "reporter task exited");
        });

        debug!(key = %self.key(), interval = ?period, "reporter started");
        *state = State::Running { shutdown, handle };
        Ok(())
    }

    /// Stop the background task; a final cycle runs when `flush_on_stop` is set.
    ///
    /// Calling `stop` more than once, or before `run`, is a no-op.
    pub fn stop(&self) {
        let previous = {
            let mut state = self.state.lock();
            if !matches!(*state, State::Running { .. }) {
                return;
            }
            std::mem::replace(&mut *state, State::Stopped)
        };
        let State::Running { shutdown, handle } = previous else {
            return;
        };

        let _ = shutdown.send(true);
        // A sink blocked inside the cycle must not keep the task alive
        handle.abort();
        debug!(key = %self.key(), "reporter stopped");

        if self.cycle.config.flush_on_stop {
            self.cycle.tick();
        }
    }

    /// Run one cycle synchronously, returning the number of records sent.
    ///
    /// `None` when the point is disabled or nothing has been recorded.
    pub fn report_once(&self) -> Result<Option<usize>> {
        self.cycle.report()
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.state.lock(), State::Running { .. })
    }

    /// Payloads the sink accepted
    pub fn delivered(&self) -> u64 {
        self.cycle.delivered.load(Ordering::Relaxed)
    }

    /// Cycles lost to sink or conversion errors
    pub fn failed(&self) -> u64 {
        self.cycle.failed.load(Ordering::Relaxed)
    }
}

impl Drop for AutoRefreshReporter {
    fn drop(&mut self) {
        if let State::Running { shutdown, handle } = &*self.state.lock() {
            let _ = shutdown.send(true);
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ConfigBuilder;
    use crate::metrics::converter::KeyedConverter;
    use crate::metrics::family::SignatureMetrics;
    use crate::metrics::signature::Signature;
    use crate::report::ChannelReportSink;

    fn collector(interval: Duration) -> MetricsCollectorConfig {
        let config = ConfigBuilder::new().build().unwrap();
        MetricsCollectorConfig::new(&config, "redis").with_interval(interval)
    }

    fn reporter(
        config: MetricsCollectorConfig,
        registry: Arc<MetricRegistry>,
        sink: Arc<dyn ReportSink>,
    ) -> AutoRefreshReporter {
        AutoRefreshReporter::new(
            config,
            registry,
            Arc::new(KeyedConverter::new("metrics", "cache-redis", "signature")),
            AdditionalAttributes::new(),
            sink,
        )
    }

    #[test]
    fn test_collector_config_overrides() {
        let config = ConfigBuilder::new()
            .report_interval(Duration::from_secs(30))
            .point_interval("redis", Duration::from_secs(5))
            .point_enabled("kafka_consumer", false)
            .build()
            .unwrap();

        let redis = MetricsCollectorConfig::new(&config, "redis");
        assert_eq!(redis.interval(), Duration::from_secs(5));
        assert!(redis.enabled());

        let consumer = MetricsCollectorConfig::new(&config, "kafka_consumer");
        assert_eq!(consumer.interval(), Duration::from_secs(30));
        assert!(!consumer.enabled());
    }

    #[test]
    fn test_run_outside_runtime_fails() {
        let (sink, _rx) = ChannelReportSink::unbounded();
        let reporter = reporter(collector(Duration::from_secs(1)), Arc::default(), Arc::new(sink));
        assert!(matches!(reporter.run(), Err(WeftError::NoRuntime)));
    }

    #[test]
    fn test_empty_registry_sends_nothing() {
        let (sink, rx) = ChannelReportSink::unbounded();
        let reporter = reporter(collector(Duration::from_secs(1)), Arc::default(), Arc::new(sink));

        assert_eq!(reporter.report_once().unwrap(), None);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_report_once_delivers_snapshot() {
        let registry = Arc::new(MetricRegistry::new());
        let metrics = SignatureMetrics::new(Arc::clone(&registry), 10).unwrap();
        metrics.record(&Signature::from("GET"), Duration::from_millis(2), false).unwrap();

        let (sink, rx) = ChannelReportSink::unbounded();
        let reporter = reporter(collector(Duration::from_secs(1)), registry, Arc::new(sink));

        assert_eq!(reporter.report_once().unwrap(), Some(1));
        let item = rx.try_recv().unwrap();
        assert_eq!(item.key, "redis");
        assert_eq!(item.find("signature", "GET").unwrap()["cnt"], 1);
        assert_eq!(reporter.delivered(), 1);
    }

    #[test]
    fn test_sink_failure_is_counted() {
        let registry = Arc::new(MetricRegistry::new());
        let metrics = SignatureMetrics::new(Arc::clone(&registry), 10).unwrap();
        metrics.record(&Signature::from("GET"), Duration::from_millis(2), false).unwrap();

        let failing = |_: MetricItem| -> Result<()> { Err(WeftError::report("collector down")) };
        let reporter = reporter(collector(Duration::from_secs(1)), registry, Arc::new(failing));

        reporter.cycle.tick();
        assert_eq!(reporter.failed(), 1);
        assert_eq!(reporter.delivered(), 0);
    }

    #[tokio::test]
    async fn test_second_run_rejected() {
        let (sink, _rx) = ChannelReportSink::unbounded();
        let reporter = reporter(collector(Duration::from_secs(60)), Arc::default(), Arc::new(sink));

        reporter.run().unwrap();
        assert!(reporter.is_running());
        assert!(matches!(reporter.run(), Err(WeftError::ReporterAlreadyStarted(_))));

        reporter.stop();
        reporter.stop();
        assert!(!reporter.is_running());
        assert!(matches!(reporter.run(), Err(WeftError::ReporterStopped(_))));
    }

    #[test]
    fn test_disabled_point_reports_nothing() {
        let registry = Arc::new(MetricRegistry::new());
        let metrics = SignatureMetrics::new(Arc::clone(&registry), 10).unwrap();
        metrics.record(&Signature::from("GET"), Duration::from_millis(2), false).unwrap();

        let (sink, rx) = ChannelReportSink::unbounded();
        let config = collector(Duration::from_secs(1)).with_enabled(false);
        let reporter = reporter(config, registry, Arc::new(sink));

        assert_eq!(reporter.report_once().unwrap(), None);
        assert!(rx.try_recv().is_err());
        assert_eq!(reporter.delivered(), 0);
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let (sink, _rx) = ChannelReportSink::unbounded();
        let config = collector(Duration::from_secs(1)).with_interval(Duration::ZERO);
        let reporter = reporter(config, Arc::default(), Arc::new(sink));

        assert!(matches!(reporter.run(), Err(WeftError::Config(_))));
        assert!(!reporter.is_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_releases_task_blocked_in_sink() {
        let registry = Arc::new(MetricRegistry::new());
        let metrics = SignatureMetrics::new(Arc::clone(&registry), 10).unwrap();
        metrics.record(&Signature::from("GET"), Duration::from_millis(2), false).unwrap();

        let (entered_tx, entered_rx) = crossbeam_channel::unbounded::<()>();
        let (release_tx, release_rx) = crossbeam_channel::unbounded::<()>();
        let blocking = move |_: MetricItem| -> Result<()> {
            let _ = entered_tx.send(());
            let _ = release_rx.recv();
            Ok(())
        };
        let reporter = reporter(collector(Duration::from_millis(20)), registry, Arc::new(blocking));
        reporter.run().unwrap();

        while entered_rx.try_recv().is_err() {
            time::sleep(Duration::from_millis(5)).await;
        }
        // reporter, background task, and the blocked cycle
        assert_eq!(Arc::strong_count(&reporter.cycle), 3);

        reporter.stop();
        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(Arc::strong_count(&reporter.cycle), 2);

        drop(release_tx);
        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(Arc::strong_count(&reporter.cycle), 1);
    }

    #[tokio::test]
    async fn test_flush_on_stop() {
        let registry = Arc::new(MetricRegistry::new());
        let metrics = SignatureMetrics::new(Arc::clone(&registry), 10).unwrap();
        metrics.record(&Signature::from("SET"), Duration::from_millis(1), false).unwrap();

        let (sink, rx) = ChannelReportSink::unbounded();
        let config = collector(Duration::from_secs(60)).with_flush_on_stop(true);
        let reporter = reporter(config, registry, Arc::new(sink));

        reporter.run().unwrap();
        reporter.stop();

        assert_eq!(rx.try_recv().unwrap().find("signature", "SET").unwrap()["cnt"], 1);
    }
}
