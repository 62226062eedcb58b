//! Command-line interface for weft.
//!
//! `weft check` validates a configuration file; `weft simulate` drives a
//! synthetic workload through every wired extension point and logs the
//! resulting metric reports.

use crate::core::{Config, ConfigBuilder, Result, WeftError};
use crate::interceptor::{ExecutionInfo, InvocationContext, MethodInfo};
use crate::provider::{points, Provider};
use crate::report::LogReportSink;
use clap::{Parser, Subcommand};
use humantime_serde::re::humantime;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Runtime telemetry core of an instrumentation agent
#[derive(Parser, Debug)]
#[command(name = "weft")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "WEFT_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, env = "WEFT_DEBUG", global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Validate the configuration and print the resolved settings
    Check,
    /// Drive synthetic calls through every extension point
    Simulate {
        /// How long to run
        #[arg(long, default_value = "5s", value_parser = humantime::parse_duration)]
        duration: Duration,

        /// Calls per second across all extension points
        #[arg(long, default_value_t = 200)]
        rate: u32,

        /// Distinct signatures per extension point
        #[arg(long, default_value_t = 50)]
        distinct: usize,
    },
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Defaults, then the config file, then CLI overrides
    pub fn load_config(&self) -> Result<Config> {
        let mut builder = ConfigBuilder::new();
        if let Some(path) = &self.config {
            let content = std::fs::read_to_string(path).map_err(|e| {
                WeftError::config(format!("Failed to read config file {:?}: {}", path, e))
            })?;
            builder = builder.from_yaml(&content)?;
            tracing::debug!("Loaded configuration from: {:?}", path);
        }
        builder.debug(self.debug).build()
    }

    /// Initialize logging based on configuration.
    pub fn init_logging(&self, config: &Config) -> Result<()> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

        let env_log_level =
            std::env::var("WEFT_LOG_LEVEL").unwrap_or_else(|_| config.logging.level.as_str().to_string());
        let log_level = if self.debug || config.debug {
            "debug"
        } else {
            env_log_level.as_str()
        };

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

        let fmt_layer = if config.logging.structured {
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .compact()
        } else {
            tracing_subscriber::fmt::layer().with_target(false).compact()
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| WeftError::config(format!("Failed to initialize logging: {}", e)))?;

        Ok(())
    }
}

/// Execute the parsed command.
pub async fn execute(cli: Cli) -> Result<()> {
    let config = cli.load_config()?;
    cli.init_logging(&config)?;

    match cli.command {
        Command::Check => {
            print!("{}", Summary(&config));
            Ok(())
        },
        Command::Simulate {
            duration,
            rate,
            distinct,
        } => simulate(config, duration, rate, distinct).await,
    }
}

struct Summary<'a>(&'a Config);

impl fmt::Display for Summary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let config = self.0;
        writeln!(f, "Configuration is valid!")?;
        writeln!(f, "  Service: {} ({})", config.service.name, config.service.system)?;
        writeln!(
            f,
            "  Tracing: {}, call logging: {}",
            config.tracing.enabled, config.tracing.log_calls
        )?;
        for key in points::METERED {
            writeln!(
                f,
                "  {:<16} enabled={} interval={} capacity={}",
                key,
                config.metrics_enabled_for(key),
                humantime::format_duration(config.interval_for(key)),
                config.cache_capacity_for(key),
            )?;
        }
        Ok(())
    }
}

/// Synthetic call `n` for one extension point
fn synthetic_call(key: &str, n: usize, distinct: usize) -> (MethodInfo<'static>, InvocationContext) {
    let slot = n % distinct.max(1);
    let ctx = InvocationContext::new();
    let call = match key {
        points::JDBC_CONNECTION => MethodInfo::new("DataSource", "getConnection")
            .with_arg(format!("jdbc:postgresql://db-{}:5432/app", slot % 4)),
        points::JDBC_STATEMENT => {
            let sql = format!("SELECT * FROM table_{} WHERE id = {}", slot, n);
            return (
                MethodInfo::new("PreparedStatement", "execute"),
                ctx.with(ExecutionInfo::new(sql)),
            );
        },
        points::HTTP_FILTER => MethodInfo::new("HttpFilter", "doFilter")
            .with_arg(format!("/api/resource/{}?page={}", slot, n)),
        points::REDIS => {
            const COMMANDS: [&str; 5] = ["GET", "SET", "HGET", "DEL", "EXPIRE"];
            MethodInfo::new("Jedis", "sendCommand")
                .with_arg(format!("{} key:{}", COMMANDS[slot % COMMANDS.len()], n))
        },
        _ => MethodInfo::new("KafkaClient", "send").with_arg(format!("topic-{}", slot)),
    };
    (call, ctx)
}

#[derive(Debug)]
struct SimulatedFailure(usize);

impl fmt::Display for SimulatedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "simulated failure for call {}", self.0)
    }
}

impl std::error::Error for SimulatedFailure {}

async fn simulate(config: Config, duration: Duration, rate: u32, distinct: usize) -> Result<()> {
    let provider = Provider::new(config, Arc::new(LogReportSink::new()))?;
    provider.start()?;
    tracing::info!(?duration, rate, distinct, "Starting simulated workload");

    let rate = rate.clamp(1, 1_000_000);
    let period = Duration::from_secs(1) / rate;
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

    let deadline = Instant::now() + duration;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut issued = 0usize;
    let mut failed = 0usize;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if Instant::now() >= deadline {
                    break;
                }
                let key = points::METERED[issued % points::METERED.len()];
                let (call, mut ctx) = synthetic_call(key, issued, distinct);
                let result = provider.invoker().invoke(key, call, &mut ctx, || {
                    if issued % 10 == 9 {
                        Err(SimulatedFailure(issued))
                    } else {
                        Ok(issued)
                    }
                });
                if result.is_err() {
                    failed += 1;
                }
                issued += 1;
            }
            _ = &mut shutdown => {
                tracing::info!("Received shutdown signal, stopping...");
                break;
            }
        }
    }

    let sent = provider.report_now()?;
    for key in points::METERED {
        if let Some(metrics) = provider.metrics(key) {
            let stats = metrics.cache_stats();
            tracing::info!(
                key,
                live = metrics.family_count(),
                hits = stats.hits,
                misses = stats.misses,
                evictions = stats.evictions,
                "Extension point summary"
            );
        }
    }
    provider.shutdown();
    tracing::info!(issued, failed, payloads = sent, "Simulation finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simulate() {
        let cli = Cli::try_parse_from([
            "weft", "simulate", "--duration", "2s", "--rate", "50", "--distinct", "7",
        ])
        .unwrap();

        assert_eq!(
            cli.command,
            Command::Simulate {
                duration: Duration::from_secs(2),
                rate: 50,
                distinct: 7,
            }
        );
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_parse_check_with_global_flags() {
        let cli = Cli::try_parse_from(["weft", "check", "--config", "weft.yaml", "-d"]).unwrap();
        assert_eq!(cli.command, Command::Check);
        assert_eq!(cli.config, Some(PathBuf::from("weft.yaml")));
        assert!(cli.debug);
    }

    #[test]
    fn test_summary_lists_every_point() {
        let config = ConfigBuilder::new().build().unwrap();
        let text = Summary(&config).to_string();
        for key in points::METERED {
            assert!(text.contains(key));
        }
    }

    #[test]
    fn test_synthetic_statement_uses_execution_info() {
        let (call, ctx) = synthetic_call(points::JDBC_STATEMENT, 12, 5);
        assert!(call.args().is_empty());
        assert_eq!(
            ctx.get::<ExecutionInfo>().map(|i| i.sql.as_str()),
            Some("SELECT * FROM table_2 WHERE id = 12")
        );
    }
}
