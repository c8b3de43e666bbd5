//! Error types for the recovery core
//!
//! Collaborator errors are the only errors that cross seams; the
//! orchestrator turns every one of them into data on the report:
//! - Handler failures become `failed` results
//! - Health failures become an `unavailable` verification payload
//! - Metrics, history and transport failures are logged and skipped
//!
//! Configuration errors are the exception: they surface when loading,
//! before any run starts.

use std::path::PathBuf;

/// Remediation handler failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    /// Handler ran and reported failure
    #[error("{0}")]
    Failed(String),

    /// Target unknown to the handler
    #[error("unknown target: {0}")]
    UnknownTarget(String),

    /// Handler panicked
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    /// Create a failure with message
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Health assessment failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HealthError {
    /// Assessment service unreachable
    #[error("health service unavailable: {0}")]
    Unavailable(String),

    /// Assessment returned something unusable
    #[error("invalid health response: {0}")]
    InvalidResponse(String),
}

/// Metrics publication failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to publish metric {name}: {message}")]
pub struct MetricsError {
    /// Metric name
    pub name: String,
    /// Backend message
    pub message: String,
}

/// Notification transport failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// No transport registered for the channel kind
    #[error("no transport registered for {0}")]
    NotRegistered(String),

    /// Transport rejected or failed to deliver
    #[error("delivery to {destination} failed: {message}")]
    DeliveryFailed {
        /// Destination address
        destination: String,
        /// Transport message
        message: String,
    },
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("io error reading {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// File extension not recognised
    #[error("unsupported config format: '{0}' (expected .yaml, .yml or .toml)")]
    UnsupportedFormat(String),

    /// YAML syntax or shape error
    #[error("invalid yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// TOML syntax or shape error
    #[error("invalid toml: {0}")]
    Toml(#[from] toml::de::Error),

    /// Structurally valid but inconsistent
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Create invalid-config error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}
