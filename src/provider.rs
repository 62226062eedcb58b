//! Wires interceptor chains, registries and reporters for every extension
//! point.

use crate::core::{Config, Result};
use crate::interceptor::{ChainBuilder, ChainInvoker, Interceptor, LogInterceptor, SpanInterceptor};
use crate::metrics::converter::{AdditionalAttributes, KeyedConverter};
use crate::metrics::family::SignatureMetrics;
use crate::metrics::interceptor::{extract, KeyExtractor, SignatureMetricInterceptor};
use crate::metrics::registry::MetricRegistry;
use crate::metrics::reporter::{AutoRefreshReporter, MetricsCollectorConfig};
use crate::metrics::signature::{SignatureDeriver, SqlCompression};
use crate::report::ReportSink;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Extension point keys.
pub mod points {
    pub const JDBC_CONNECTION: &str = "jdbc_connection";
    pub const JDBC_STATEMENT: &str = "jdbc_statement";
    pub const HTTP_FILTER: &str = "http_filter";
    pub const REDIS: &str = "redis";
    pub const KAFKA_PRODUCER: &str = "kafka_producer";
    /// Completion callback of an asynchronous send; shares the producer's interceptors.
    ///
    /// Each send goes through exactly one of the two chains: synchronous sends
    /// through [`KAFKA_PRODUCER`], asynchronous sends through this one once the
    /// outcome is known. Invoking both for the same send counts it twice.
    pub const KAFKA_PRODUCER_CALLBACK: &str = "kafka_producer_callback";
    pub const KAFKA_CONSUMER: &str = "kafka_consumer";

    /// Points that own a registry and a reporter
    pub const METERED: [&str; 6] = [
        JDBC_CONNECTION,
        JDBC_STATEMENT,
        HTTP_FILTER,
        REDIS,
        KAFKA_PRODUCER,
        KAFKA_CONSUMER,
    ];
}

/// Category stamped on every record
pub const CATEGORY: &str = "application";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Metrics,
    Span,
    Log,
}

struct PointLayout {
    key: &'static str,
    type_name: &'static str,
    key_field: &'static str,
    extractor: fn() -> KeyExtractor,
    mask_literals: bool,
    stages: &'static [Stage],
}

static LAYOUTS: [PointLayout; 6] = [
    PointLayout {
        key: points::JDBC_CONNECTION,
        type_name: "jdbc-connection",
        key_field: "url",
        extractor: extract::connection_url,
        mask_literals: false,
        stages: &[Stage::Metrics],
    },
    PointLayout {
        key: points::JDBC_STATEMENT,
        type_name: "jdbc-statement",
        key_field: "signature",
        extractor: extract::sql_text,
        mask_literals: true,
        stages: &[Stage::Metrics, Stage::Span],
    },
    PointLayout {
        key: points::HTTP_FILTER,
        type_name: "http-request",
        key_field: "url",
        extractor: extract::http_route,
        mask_literals: false,
        stages: &[Stage::Metrics, Stage::Span, Stage::Log],
    },
    PointLayout {
        key: points::REDIS,
        type_name: "cache-redis",
        key_field: "signature",
        extractor: extract::redis_command,
        mask_literals: false,
        stages: &[Stage::Metrics, Stage::Span],
    },
    PointLayout {
        key: points::KAFKA_PRODUCER,
        type_name: "kafka-producer",
        key_field: "resource",
        extractor: extract::kafka_topic,
        mask_literals: false,
        stages: &[Stage::Metrics, Stage::Span],
    },
    PointLayout {
        key: points::KAFKA_CONSUMER,
        type_name: "kafka-consumer",
        key_field: "resource",
        extractor: extract::kafka_topic,
        mask_literals: false,
        stages: &[Stage::Span, Stage::Metrics],
    },
];

/// Metric state owned by one extension point.
pub struct InstrumentedPoint {
    metrics: Arc<SignatureMetrics>,
    reporter: AutoRefreshReporter,
}

impl InstrumentedPoint {
    pub fn metrics(&self) -> &Arc<SignatureMetrics> {
        &self.metrics
    }

    pub fn reporter(&self) -> &AutoRefreshReporter {
        &self.reporter
    }
}

/// Owns the shared [`ChainInvoker`] and the per-point metric pipelines.
pub struct Provider {
    config: Config,
    invoker: Arc<ChainInvoker>,
    points: BTreeMap<&'static str, InstrumentedPoint>,
}

impl Provider {
    /// Build every chain; reporters are created but not started
    pub fn new(config: Config, sink: Arc<dyn ReportSink>) -> Result<Self> {
        let attributes = AdditionalAttributes::from_config(&config);
        Self::with_attributes(config, sink, attributes)
    }

    pub fn with_attributes(
        config: Config,
        sink: Arc<dyn ReportSink>,
        attributes: AdditionalAttributes,
    ) -> Result<Self> {
        config.validate()?;

        let invoker = Arc::new(ChainInvoker::new());
        let mut points = BTreeMap::new();

        for layout in &LAYOUTS {
            let registry = Arc::new(MetricRegistry::new());
            let metrics = Arc::new(SignatureMetrics::new(
                Arc::clone(&registry),
                config.cache_capacity_for(layout.key),
            )?);
            let deriver: Arc<dyn SignatureDeriver> = Arc::new(SqlCompression::new(
                config.signature.max_length,
                layout.mask_literals && config.signature.mask_literals,
            ));

            let builder = Self::chain_for(&config, layout, &metrics, deriver);
            if layout.key == points::KAFKA_PRODUCER {
                invoker.register(points::KAFKA_PRODUCER_CALLBACK, builder.clone().build());
            }
            invoker.register(layout.key, builder.build());

            let reporter = AutoRefreshReporter::new(
                MetricsCollectorConfig::new(&config, layout.key),
                registry,
                Arc::new(KeyedConverter::new(CATEGORY, layout.type_name, layout.key_field)),
                attributes.clone(),
                Arc::clone(&sink),
            );
            points.insert(layout.key, InstrumentedPoint { metrics, reporter });
        }

        debug!(chains = ?invoker.keys(), "provider assembled");
        Ok(Self {
            config,
            invoker,
            points,
        })
    }

    fn chain_for(
        config: &Config,
        layout: &PointLayout,
        metrics: &Arc<SignatureMetrics>,
        deriver: Arc<dyn SignatureDeriver>,
    ) -> ChainBuilder {
        let mut builder = ChainBuilder::new();
        for stage in layout.stages {
            let interceptor: Option<Arc<dyn Interceptor>> = match stage {
                Stage::Metrics => Some(Arc::new(SignatureMetricInterceptor::new(
                    Arc::clone(metrics),
                    (layout.extractor)(),
                    Arc::clone(&deriver),
                ))),
                Stage::Span if config.tracing.enabled => Some(Arc::new(SpanInterceptor::new(layout.key))),
                Stage::Log if config.tracing.log_calls => Some(Arc::new(LogInterceptor::new(layout.key))),
                Stage::Span | Stage::Log => None,
            };
            if let Some(interceptor) = interceptor {
                builder = builder.add_shared(interceptor);
            }
        }
        builder
    }

    /// Start every reporter on the current tokio runtime
    pub fn start(&self) -> Result<()> {
        for point in self.points.values() {
            point.reporter.run()?;
        }
        info!(points = self.points.len(), "metric reporters started");
        Ok(())
    }

    /// Run one report cycle for every point, returning how many payloads were sent
    pub fn report_now(&self) -> Result<usize> {
        let mut sent = 0;
        for point in self.points.values() {
            if point.reporter.report_once()?.is_some() {
                sent += 1;
            }
        }
        Ok(sent)
    }

    /// Stop reporters (flushing when configured), release metric families
    /// and unregister every chain
    pub fn shutdown(&self) {
        for (key, point) in &self.points {
            point.reporter.stop();
            point.metrics.clear();
            debug!(key, "extension point shut down");
        }
        for key in self.invoker.keys() {
            self.invoker.unregister(&key);
        }
        info!("provider shut down");
    }

    pub fn invoker(&self) -> &Arc<ChainInvoker> {
        &self.invoker
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn point(&self, key: &str) -> Option<&InstrumentedPoint> {
        self.points.get(key)
    }

    pub fn metrics(&self, key: &str) -> Option<&Arc<SignatureMetrics>> {
        self.points.get(key).map(InstrumentedPoint::metrics)
    }

    pub fn reporter(&self, key: &str) -> Option<&AutoRefreshReporter> {
        self.points.get(key).map(InstrumentedPoint::reporter)
    }
}
