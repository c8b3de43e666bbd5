//! Recovery run reports
//!
//! One [`RecoveryReport`] is produced per incident signal. It is the audit
//! record written to history and the payload rendered into notifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

use crate::action::{ActionStatus, RecoveryResult};
use crate::health::SystemHealth;
use crate::severity::Severity;
use crate::signal::{TriggerId, TriggerKind};

/// Unique run identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(pub Ulid);

impl RunId {
    /// Generate new run ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stages of a recovery run, strictly linear
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStage {
    /// Building the plan from the catalog
    Planning,
    /// Dropping actions still in cooldown
    Filtering,
    /// Running actions
    Executing,
    /// Re-assessing health
    Verifying,
    /// Assembling, persisting and publishing the report
    Reporting,
    /// Notifications attempted; terminal
    Notified,
}

impl RunStage {
    /// The stage after this one; `Notified` is terminal
    #[inline]
    #[must_use]
    pub fn next(self) -> Option<RunStage> {
        match self {
            RunStage::Planning => Some(RunStage::Filtering),
            RunStage::Filtering => Some(RunStage::Executing),
            RunStage::Executing => Some(RunStage::Verifying),
            RunStage::Verifying => Some(RunStage::Reporting),
            RunStage::Reporting => Some(RunStage::Notified),
            RunStage::Notified => None,
        }
    }

    /// Whether the run is finished
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self.next().is_none()
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStage::Planning => "planning",
            RunStage::Filtering => "filtering",
            RunStage::Executing => "executing",
            RunStage::Verifying => "verifying",
            RunStage::Reporting => "reporting",
            RunStage::Notified => "notified",
        };
        f.write_str(name)
    }
}

/// Post-recovery health assessment outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum HealthAfter {
    /// Verification has not run
    NotChecked,
    /// Assessment succeeded
    Assessed {
        /// Snapshot after remediation
        health: SystemHealth,
    },
    /// Assessment itself failed
    Unavailable {
        /// Error text from the assessor
        error: String,
        /// When the attempt was made
        attempted_at: DateTime<Utc>,
    },
}

impl HealthAfter {
    /// The snapshot, when assessment succeeded
    #[inline]
    #[must_use]
    pub fn health(&self) -> Option<&SystemHealth> {
        match self {
            HealthAfter::Assessed { health } => Some(health),
            _ => None,
        }
    }
}

/// Before/after health comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthComparison {
    /// Score before recovery
    pub score_before: f64,
    /// Score after recovery
    pub score_after: f64,
    /// `score_after - score_before`
    pub score_delta: f64,
    /// Components unhealthy before and healthy after
    pub recovered: Vec<String>,
    /// Components still unhealthy after
    pub still_unhealthy: Vec<String>,
}

impl HealthComparison {
    /// Compare two snapshots
    #[must_use]
    pub fn between(before: &SystemHealth, after: &SystemHealth) -> Self {
        let recovered = before
            .unhealthy()
            .filter(|(name, _)| {
                after
                    .components
                    .get(*name)
                    .is_some_and(|c| !c.status.is_unhealthy())
            })
            .map(|(name, _)| name.clone())
            .collect();
        let still_unhealthy = after.unhealthy().map(|(name, _)| name.clone()).collect();

        Self {
            score_before: before.score,
            score_after: after.score,
            score_delta: after.score - before.score,
            recovered,
            still_unhealthy,
        }
    }
}

/// What happened to the notifications of one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationOutcome {
    /// Channels a send was attempted on
    pub attempted: Vec<String>,
    /// Channels that accepted the message
    pub delivered: Vec<String>,
    /// Channels filtered out, with reason
    pub suppressed: Vec<(String, String)>,
    /// Channels whose transport failed, with error
    pub failed: Vec<(String, String)>,
}

impl NotificationOutcome {
    /// Fold another outcome into this one
    pub fn merge(&mut self, other: NotificationOutcome) {
        self.attempted.extend(other.attempted);
        self.delivered.extend(other.delivered);
        self.suppressed.extend(other.suppressed);
        self.failed.extend(other.failed);
    }

    /// Number of successful deliveries
    #[inline]
    #[must_use]
    pub fn delivered_count(&self) -> usize {
        self.delivered.len()
    }
}

/// Aggregate of one recovery run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// Run identifier
    pub run_id: RunId,
    /// Identifier of the triggering signal
    pub trigger_id: TriggerId,
    /// What triggered the run
    pub trigger: TriggerKind,
    /// Whether the trigger was CRITICAL-class
    pub critical: bool,
    /// Run start
    pub started_at: DateTime<Utc>,
    /// Run end (after reporting, before notification)
    pub finished_at: DateTime<Utc>,
    /// Number of results
    pub total_actions: usize,
    /// Results with `success`
    pub successful_actions: usize,
    /// Results with `failed`
    pub failed_actions: usize,
    /// Results with `skipped`
    pub skipped_actions: usize,
    /// Results in plan order
    pub results: Vec<RecoveryResult>,
    /// Snapshot carried by the signal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_health_before: Option<SystemHealth>,
    /// Snapshot after remediation
    pub system_health_after: HealthAfter,
    /// Before/after comparison when both snapshots exist
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparison: Option<HealthComparison>,
    /// Notification delivery record
    #[serde(default)]
    pub notifications: NotificationOutcome,
    /// Last stage reached
    pub stage: RunStage,
}

impl RecoveryReport {
    /// Assemble a report, deriving counts from `results`
    #[must_use]
    pub fn assemble(
        run_id: RunId,
        trigger_id: TriggerId,
        trigger: TriggerKind,
        critical: bool,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        results: Vec<RecoveryResult>,
    ) -> Self {
        let count = |status: ActionStatus| results.iter().filter(|r| r.status == status).count();
        Self {
            run_id,
            trigger_id,
            trigger,
            critical,
            started_at,
            finished_at,
            total_actions: results.len(),
            successful_actions: count(ActionStatus::Success),
            failed_actions: count(ActionStatus::Failed),
            skipped_actions: count(ActionStatus::Skipped),
            results,
            system_health_before: None,
            system_health_after: HealthAfter::NotChecked,
            comparison: None,
            notifications: NotificationOutcome::default(),
            stage: RunStage::Reporting,
        }
    }

    /// Attach both health snapshots and derive the comparison
    #[must_use]
    pub fn with_health(mut self, before: Option<SystemHealth>, after: HealthAfter) -> Self {
        self.comparison = match (&before, after.health()) {
            (Some(before), Some(after)) => Some(HealthComparison::between(before, after)),
            _ => None,
        };
        self.system_health_before = before;
        self.system_health_after = after;
        self
    }

    /// Successful / total; 0 when nothing was attempted
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total_actions == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = self.successful_actions as f64 / self.total_actions as f64;
        rate
    }

    /// Run duration in milliseconds, never negative
    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        u64::try_from((self.finished_at - self.started_at).num_milliseconds()).unwrap_or(0)
    }

    /// Severity of the run outcome: WARNING if any action failed, else INFO
    #[inline]
    #[must_use]
    pub fn severity(&self) -> Severity {
        if self.failed_actions > 0 {
            Severity::Warning
        } else {
            Severity::Info
        }
    }

    /// No action succeeded and no notification got through although one was tried
    #[must_use]
    pub fn is_total_failure(&self) -> bool {
        self.successful_actions == 0
            && self.notifications.delivered.is_empty()
            && (self.failed_actions > 0 || !self.notifications.attempted.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionKind, RecoveryActionSpec};
    use crate::health::{ComponentHealth, HealthStatus};
    use std::collections::BTreeMap;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn report(results: Vec<RecoveryResult>) -> RecoveryReport {
        RecoveryReport::assemble(
            RunId::new(),
            TriggerId::new(),
            TriggerKind::Alarm,
            false,
            at(0),
            at(3),
            results,
        )
    }

    #[test]
    fn empty_report_has_zero_success_rate() {
        let report = report(vec![]);
        assert_eq!(report.total_actions, 0);
        assert!(report.success_rate().abs() < f64::EPSILON);
        assert!(!report.success_rate().is_nan());
        assert_eq!(report.severity(), Severity::Info);
        assert_eq!(report.duration_ms(), 3000);
    }

    #[test]
    fn counts_and_severity_follow_results() {
        let spec = RecoveryActionSpec::new(ActionKind::RestartService, "lambda-functions", 1, 10);
        let report = report(vec![
            RecoveryResult::success(spec.clone(), 5, 1, serde_json::Value::Null, at(1)),
            RecoveryResult::failed(spec, 5, 1, "boom", at(2)),
        ]);

        assert_eq!(report.successful_actions, 1);
        assert_eq!(report.failed_actions, 1);
        assert!((report.success_rate() - 0.5).abs() < f64::EPSILON);
        assert_eq!(report.severity(), Severity::Warning);
        assert!(!report.is_total_failure());
    }

    #[test]
    fn stages_advance_linearly_to_notified() {
        let mut stage = RunStage::Planning;
        let mut seen = vec![stage];
        while let Some(next) = stage.next() {
            assert!(next > stage);
            stage = next;
            seen.push(stage);
        }
        assert_eq!(seen.len(), 6);
        assert!(stage.is_terminal());
        assert_eq!(stage, RunStage::Notified);
    }

    #[test]
    fn comparison_tracks_recovered_components() {
        let mut before = BTreeMap::new();
        before.insert("api".to_string(), ComponentHealth::new(HealthStatus::Critical, at(0)));
        before.insert("db".to_string(), ComponentHealth::new(HealthStatus::Degraded, at(0)));
        let mut after = BTreeMap::new();
        after.insert("api".to_string(), ComponentHealth::new(HealthStatus::Healthy, at(5)));
        after.insert("db".to_string(), ComponentHealth::new(HealthStatus::Degraded, at(5)));

        let before = SystemHealth::from_components(before, at(0));
        let after = SystemHealth::from_components(after, at(5));
        let report = report(vec![]).with_health(
            Some(before),
            HealthAfter::Assessed { health: after },
        );

        let comparison = report.comparison.unwrap();
        assert_eq!(comparison.recovered, vec!["api".to_string()]);
        assert_eq!(comparison.still_unhealthy, vec!["db".to_string()]);
        assert!((comparison.score_delta - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn verification_failure_leaves_no_comparison() {
        let report = report(vec![]).with_health(
            None,
            HealthAfter::Unavailable {
                error: "timeout".into(),
                attempted_at: at(4),
            },
        );
        assert!(report.comparison.is_none());
        assert!(report.system_health_after.health().is_none());
    }
}
