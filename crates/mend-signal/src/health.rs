//! Health snapshot types
//!
//! These mirror what the health-assessment service reports. The recovery
//! core only reads them: a snapshot is taken before recovery (inside the
//! incident signal) and again after remediation for comparison.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::SignalError;

/// Health status of a single component or of the whole system
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HealthStatus {
    /// Operating normally
    Healthy,
    /// Partially impaired
    Degraded,
    /// Down or close to it
    Critical,
}

impl HealthStatus {
    /// Stable lowercase name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Critical => "critical",
        }
    }

    /// Whether the status needs attention
    #[inline]
    #[must_use]
    pub fn is_unhealthy(&self) -> bool {
        !matches!(self, HealthStatus::Healthy)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HealthStatus {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "healthy" => Ok(HealthStatus::Healthy),
            "degraded" => Ok(HealthStatus::Degraded),
            "critical" => Ok(HealthStatus::Critical),
            other => Err(SignalError::UnknownStatus(other.to_string())),
        }
    }
}

/// Health of one component as last observed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Current status
    pub status: HealthStatus,
    /// Probe response time in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    /// Error rate as a fraction (0.0 - 1.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_rate: Option<f64>,
    /// When the probe ran
    pub last_check: DateTime<Utc>,
    /// Free-form probe details
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

impl ComponentHealth {
    /// Component health with only a status
    #[inline]
    #[must_use]
    pub fn new(status: HealthStatus, last_check: DateTime<Utc>) -> Self {
        Self {
            status,
            response_time_ms: None,
            error_rate: None,
            last_check,
            details: serde_json::Value::Null,
        }
    }

    /// With response time
    #[inline]
    #[must_use]
    pub fn with_response_time(mut self, ms: u64) -> Self {
        self.response_time_ms = Some(ms);
        self
    }

    /// With error rate, clamped to 0.0 - 1.0
    #[inline]
    #[must_use]
    pub fn with_error_rate(mut self, rate: f64) -> Self {
        self.error_rate = Some(rate.clamp(0.0, 1.0));
        self
    }

    /// With probe details
    #[inline]
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Whole-system health snapshot returned by the health-assessment service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealth {
    /// Aggregate score, 0 (down) to 100 (fully healthy)
    pub score: f64,
    /// Aggregate status
    pub status: HealthStatus,
    /// Per-component health keyed by component name
    pub components: BTreeMap<String, ComponentHealth>,
    /// When the assessment completed
    pub assessed_at: DateTime<Utc>,
}

impl SystemHealth {
    /// Build a snapshot, deriving score and status from the components.
    ///
    /// Healthy components count 100, degraded 50, critical 0. Any critical
    /// component makes the system critical; any degraded one makes it
    /// degraded. An empty component set is healthy.
    #[must_use]
    pub fn from_components(
        components: BTreeMap<String, ComponentHealth>,
        assessed_at: DateTime<Utc>,
    ) -> Self {
        let status = components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        let score = if components.is_empty() {
            100.0
        } else {
            let total: f64 = components
                .values()
                .map(|c| match c.status {
                    HealthStatus::Healthy => 100.0,
                    HealthStatus::Degraded => 50.0,
                    HealthStatus::Critical => 0.0,
                })
                .sum();
            #[allow(clippy::cast_precision_loss)]
            let count = components.len() as f64;
            total / count
        };

        Self {
            score,
            status,
            components,
            assessed_at,
        }
    }

    /// Names of components that are not healthy, in name order
    pub fn unhealthy(&self) -> impl Iterator<Item = (&String, &ComponentHealth)> {
        self.components
            .iter()
            .filter(|(_, health)| health.status.is_unhealthy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn status_parse_and_display() {
        assert_eq!("Critical".parse::<HealthStatus>().unwrap(), HealthStatus::Critical);
        assert_eq!(HealthStatus::Degraded.to_string(), "degraded");
        assert!("sideways".parse::<HealthStatus>().is_err());
    }

    #[test]
    fn status_ordering_tracks_severity() {
        assert!(HealthStatus::Critical > HealthStatus::Degraded);
        assert!(HealthStatus::Degraded > HealthStatus::Healthy);
    }

    #[test]
    fn snapshot_aggregates_components() {
        let mut components = BTreeMap::new();
        components.insert("api".to_string(), ComponentHealth::new(HealthStatus::Healthy, at()));
        components.insert("db".to_string(), ComponentHealth::new(HealthStatus::Degraded, at()));

        let health = SystemHealth::from_components(components, at());
        assert_eq!(health.status, HealthStatus::Degraded);
        assert!((health.score - 75.0).abs() < f64::EPSILON);
        let unhealthy: Vec<_> = health.unhealthy().map(|(name, _)| name.as_str()).collect();
        assert_eq!(unhealthy, vec!["db"]);
    }

    #[test]
    fn empty_snapshot_is_healthy() {
        let health = SystemHealth::from_components(BTreeMap::new(), at());
        assert_eq!(health.status, HealthStatus::Healthy);
        assert!((health.score - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn error_rate_is_clamped() {
        let health = ComponentHealth::new(HealthStatus::Critical, at()).with_error_rate(3.0);
        assert_eq!(health.error_rate, Some(1.0));
    }
}
