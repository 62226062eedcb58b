//! Configuration management for weft.
//!
//! Configuration is read once at agent startup:
//! - YAML file support
//! - Programmatic construction through [`ConfigBuilder`]
//! - Per extension point overrides for metric collection
//! - Validation and defaults
//!
//! There is no live reload; components copy what they need at construction.

use crate::core::{Result, WeftError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

/// Default number of live signatures tracked per extension point.
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

/// Complete configuration for the agent core
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Identity of the instrumented service
    pub service: ServiceConfig,
    /// Metric collection and reporting
    pub metrics: MetricsConfig,
    /// Span and call-log interceptors
    pub tracing: TracingConfig,
    /// Signature derivation
    pub signature: SignatureConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Debug mode
    #[serde(skip)]
    pub debug: bool,
}

/// Service identity, mixed into every metric record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Service name
    pub name: String,
    /// System the service belongs to
    pub system: String,
}

/// Metric collection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Global switch for metric reporting
    pub enabled: bool,
    /// Report interval
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Maximum live signatures per extension point
    pub cache_capacity: usize,
    /// Emit one last report when a reporter is stopped
    pub flush_on_stop: bool,
    /// Extra static attributes added to every record
    pub attributes: BTreeMap<String, String>,
    /// Per extension point overrides
    pub points: HashMap<String, PointConfig>,
}

/// Overrides for one extension point; unset fields fall back to [`MetricsConfig`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PointConfig {
    /// Report metrics for this point
    pub enabled: Option<bool>,
    /// Report interval for this point
    #[serde(with = "humantime_serde")]
    pub interval: Option<Duration>,
    /// Signature cache capacity for this point
    pub cache_capacity: Option<usize>,
}

/// Tracing interceptor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    /// Attach span interceptors to chains
    pub enabled: bool,
    /// Attach the call logging interceptor to HTTP chains
    pub log_calls: bool,
}

/// Signature derivation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignatureConfig {
    /// Maximum signature length in bytes
    pub max_length: usize,
    /// Replace string and numeric literals with `?`
    pub mask_literals: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,
    /// Structured logging format
    pub structured: bool,
}

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            name: "unknown-service".to_string(),
            system: "unknown-system".to_string(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        MetricsConfig {
            enabled: true,
            interval: Duration::from_secs(30),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            flush_on_stop: false,
            attributes: BTreeMap::new(),
            points: HashMap::new(),
        }
    }
}

impl Default for TracingConfig {
    fn default() -> Self {
        TracingConfig {
            enabled: true,
            log_calls: false,
        }
    }
}

impl Default for SignatureConfig {
    fn default() -> Self {
        SignatureConfig {
            max_length: 1024,
            mask_literals: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Info,
            structured: false,
        }
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Result<Self> {
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            WeftError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        ConfigBuilder::new().from_yaml(&content)?.build()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.metrics.cache_capacity == 0 {
            return Err(WeftError::config("cache_capacity must be greater than 0"));
        }

        if self.metrics.interval.is_zero() {
            return Err(WeftError::config("metrics interval must be greater than 0"));
        }

        for (point, overrides) in &self.metrics.points {
            if overrides.cache_capacity == Some(0) {
                return Err(WeftError::config(format!(
                    "cache_capacity for '{}' must be greater than 0",
                    point
                )));
            }
            if overrides.interval.is_some_and(|i| i.is_zero()) {
                return Err(WeftError::config(format!(
                    "interval for '{}' must be greater than 0",
                    point
                )));
            }
        }

        if self.signature.max_length == 0 {
            return Err(WeftError::config("signature max_length must be greater than 0"));
        }

        Ok(())
    }

    /// Signature cache capacity for an extension point
    pub fn cache_capacity_for(&self, point: &str) -> usize {
        self.metrics
            .points
            .get(point)
            .and_then(|p| p.cache_capacity)
            .unwrap_or(self.metrics.cache_capacity)
    }

    /// Whether metrics are reported for an extension point
    pub fn metrics_enabled_for(&self, point: &str) -> bool {
        self.metrics
            .points
            .get(point)
            .and_then(|p| p.enabled)
            .unwrap_or(self.metrics.enabled)
    }

    /// Report interval for an extension point
    pub fn interval_for(&self, point: &str) -> Duration {
        self.metrics
            .points
            .get(point)
            .and_then(|p| p.interval)
            .unwrap_or(self.metrics.interval)
    }
}

impl LogLevel {
    /// Convert to tracing filter string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Configuration builder for programmatic construction
pub struct ConfigBuilder {
    config: Config,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        ConfigBuilder {
            config: Config::default(),
        }
    }

    /// Load configuration from YAML string
    pub fn from_yaml(mut self, yaml: &str) -> Result<Self> {
        self.config = serde_yaml::from_str(yaml)
            .map_err(|e| WeftError::config(format!("Failed to parse YAML config: {}", e)))?;
        Ok(self)
    }

    /// Set service name
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.config.service.name = name.into();
        self
    }

    /// Set system name
    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.config.service.system = system.into();
        self
    }

    /// Set global signature cache capacity
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.config.metrics.cache_capacity = capacity;
        self
    }

    /// Set global report interval
    pub fn report_interval(mut self, interval: Duration) -> Self {
        self.config.metrics.interval = interval;
        self
    }

    /// Override the report interval of one extension point
    pub fn point_interval(mut self, point: &str, interval: Duration) -> Self {
        self.config
            .metrics
            .points
            .entry(point.to_string())
            .or_default()
            .interval = Some(interval);
        self
    }

    /// Override the signature cache capacity of one extension point
    pub fn point_capacity(mut self, point: &str, capacity: usize) -> Self {
        self.config
            .metrics
            .points
            .entry(point.to_string())
            .or_default()
            .cache_capacity = Some(capacity);
        self
    }

    /// Enable or disable metrics for one extension point
    pub fn point_enabled(mut self, point: &str, enabled: bool) -> Self {
        self.config
            .metrics
            .points
            .entry(point.to_string())
            .or_default()
            .enabled = Some(enabled);
        self
    }

    /// Add a static attribute to every metric record
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.metrics.attributes.insert(key.into(), value.into());
        self
    }

    /// Flush one last report when reporters stop
    pub fn flush_on_stop(mut self, flush: bool) -> Self {
        self.config.metrics.flush_on_stop = flush;
        self
    }

    /// Enable or disable span interceptors
    pub fn tracing(mut self, enabled: bool) -> Self {
        self.config.tracing.enabled = enabled;
        self
    }

    /// Set debug mode
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
