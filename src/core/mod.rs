//! Core configuration and error types shared by every weft component.

#![warn(missing_docs)]

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::{Config, ConfigBuilder, LogLevel, MetricsConfig, PointConfig};
pub use error::{Result, WeftError};
