use thiserror::Error;

use crate::metrics::name::MetricKind;

#[derive(Error, Debug)]
pub enum WeftError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Metric '{name}' is registered as a {found}, requested as a {expected}")]
    MetricKindMismatch {
        name: String,
        expected: MetricKind,
        found: MetricKind,
    },

    #[error("Reporter for '{0}' has already been started")]
    ReporterAlreadyStarted(String),

    #[error("Reporter for '{0}' has been stopped")]
    ReporterStopped(String),

    #[error("No tokio runtime available to schedule the reporter")]
    NoRuntime,

    #[error("Report error: {0}")]
    Report(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Channel send error")]
    ChannelSend,
}

/// Result type alias for weft operations
pub type Result<T> = std::result::Result<T, WeftError>;

impl WeftError {
    /// Creates a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a new report error
    pub fn report<S: Into<String>>(msg: S) -> Self {
        Self::Report(msg.into())
    }

    /// Returns true if the next attempt may succeed without intervention
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Report(_) | Self::ChannelSend)
    }

    /// Returns the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::MetricKindMismatch { .. } => "registry",
            Self::ReporterAlreadyStarted(_) | Self::ReporterStopped(_) | Self::NoRuntime => {
                "reporter"
            },
            Self::Report(_) | Self::ChannelSend => "report",
            Self::Serialization(_) => "serialization",
        }
    }
}
