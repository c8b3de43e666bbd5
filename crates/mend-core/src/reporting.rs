//! Report metrics and persistence
//!
//! After a run is assembled its summary counters go to the metrics backend
//! and the full report goes to history. Neither may fail the run: errors
//! are logged and the in-memory report is still returned and dispatched.

use async_trait::async_trait;
use mend_signal::RecoveryReport;
use mend_store::HistoryStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::MetricsError;

/// Number of actions in the run
pub const ACTIONS_EXECUTED: &str = "mend.recovery.actions_executed";
/// Successful / total, in percent
pub const SUCCESS_RATE: &str = "mend.recovery.success_rate";
/// Run wall-clock duration
pub const RUN_DURATION: &str = "mend.recovery.duration_ms";

/// Unit of a published value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricUnit {
    /// Plain count
    Count,
    /// 0 - 100
    Percent,
    /// Milliseconds
    Milliseconds,
}

impl MetricUnit {
    fn as_metrics_unit(self) -> metrics::Unit {
        match self {
            MetricUnit::Count => metrics::Unit::Count,
            MetricUnit::Percent => metrics::Unit::Percent,
            MetricUnit::Milliseconds => metrics::Unit::Milliseconds,
        }
    }
}

/// External metrics backend
#[async_trait]
pub trait MetricsBackend: Send + Sync {
    /// Publish one data point
    async fn publish(
        &self,
        name: &str,
        value: f64,
        unit: MetricUnit,
        dimensions: &[(String, String)],
    ) -> Result<(), MetricsError>;
}

/// Forwards to whatever `metrics` recorder the process installed
///
/// Without an installed recorder every publish is a no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct FacadeMetricsBackend;

impl FacadeMetricsBackend {
    /// Create backend and describe the run metrics to the recorder
    #[must_use]
    pub fn new() -> Self {
        metrics::describe_gauge!(
            ACTIONS_EXECUTED,
            MetricUnit::Count.as_metrics_unit(),
            "Actions in the last recovery run"
        );
        metrics::describe_gauge!(
            SUCCESS_RATE,
            MetricUnit::Percent.as_metrics_unit(),
            "Share of successful actions in the last recovery run"
        );
        metrics::describe_gauge!(
            RUN_DURATION,
            MetricUnit::Milliseconds.as_metrics_unit(),
            "Duration of the last recovery run"
        );
        Self
    }
}

#[async_trait]
impl MetricsBackend for FacadeMetricsBackend {
    async fn publish(
        &self,
        name: &str,
        value: f64,
        _unit: MetricUnit,
        dimensions: &[(String, String)],
    ) -> Result<(), MetricsError> {
        let labels: Vec<(String, String)> = dimensions.to_vec();
        metrics::gauge!(name.to_owned(), &labels).set(value);
        Ok(())
    }
}

/// Publishes counters and persists the report
#[derive(Clone)]
pub struct ReportEmitter {
    metrics: Arc<dyn MetricsBackend>,
    history: Arc<dyn HistoryStore>,
}

impl std::fmt::Debug for ReportEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportEmitter").finish_non_exhaustive()
    }
}

impl ReportEmitter {
    /// Create emitter
    #[inline]
    #[must_use]
    pub fn new(metrics: Arc<dyn MetricsBackend>, history: Arc<dyn HistoryStore>) -> Self {
        Self { metrics, history }
    }

    /// Counters derived from `report`
    #[must_use]
    pub fn counters(report: &RecoveryReport) -> [(&'static str, f64, MetricUnit); 3] {
        #[allow(clippy::cast_precision_loss)]
        let total = report.total_actions as f64;
        #[allow(clippy::cast_precision_loss)]
        let duration = report.duration_ms() as f64;
        [
            (ACTIONS_EXECUTED, total, MetricUnit::Count),
            (SUCCESS_RATE, report.success_rate() * 100.0, MetricUnit::Percent),
            (RUN_DURATION, duration, MetricUnit::Milliseconds),
        ]
    }

    /// Publish counters and store the report, logging any failure
    pub async fn emit(&self, report: &RecoveryReport) {
        let dimensions = vec![("trigger".to_string(), report.trigger.as_str().to_string())];

        for (name, value, unit) in Self::counters(report) {
            if let Err(error) = self.metrics.publish(name, value, unit, &dimensions).await {
                tracing::warn!(run_id = %report.run_id, metric = name, %error, "failed to publish metric");
            }
        }

        if let Err(error) = self.history.put(report).await {
            tracing::warn!(run_id = %report.run_id, %error, "failed to persist recovery report");
        }
    }
}
