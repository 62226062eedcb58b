//! weft - runtime telemetry core of an instrumentation agent.
//!
//! Turns intercepted calls (JDBC statements and connections, HTTP filters,
//! Redis commands, Kafka producers and consumers) into metrics and trace
//! spans while bounding the memory those observations consume.
//!
//! # Architecture
//!
//! - `interceptor`: before/after hooks, ordered chains and the invoker the
//!   weaving layer calls
//! - `metrics`: signature-keyed metric families, the bounded signature
//!   cache and the periodic reporter
//! - `report`: sinks that receive converted payloads
//! - `provider`: wiring of chains, registries and reporters per extension
//!   point
//! - `core`: configuration and errors
//! - `cli`: command-line interface
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use weft_lib::interceptor::{InvocationContext, MethodInfo};
//! use weft_lib::provider::{points, Provider};
//! use weft_lib::report::LogReportSink;
//! use weft_lib::Config;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = Provider::new(Config::new()?, Arc::new(LogReportSink::new()))?;
//!     provider.start()?;
//!
//!     let mut ctx = InvocationContext::new();
//!     let call = MethodInfo::new("Statement", "execute").with_arg("select * from orders");
//!     let rows: Result<u64, std::io::Error> =
//!         provider.invoker().invoke(points::JDBC_STATEMENT, call, &mut ctx, || Ok(3));
//!     assert_eq!(rows?, 3);
//!
//!     provider.shutdown();
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod cli;
pub mod core;
pub mod interceptor;
pub mod metrics;
pub mod provider;
pub mod report;

// Re-export core types for convenience
pub use crate::core::{Config, Result, WeftError};
pub use crate::interceptor::{ChainInvoker, Interceptor, InterceptorChain};
pub use crate::provider::Provider;
