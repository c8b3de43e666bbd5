//! Recovery history
//!
//! Append-only audit trail of recovery reports. Runs never coordinate
//! through history, so the store needs no cross-run locking.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mend_signal::{RecoveryReport, RunId, TriggerKind};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::error::StoreError;

/// Default report retention (30 days)
#[inline]
#[must_use]
pub fn default_retention() -> Duration {
    Duration::from_secs(30 * 24 * 60 * 60)
}

/// Filter for history queries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryQuery {
    /// Only runs with this trigger
    #[serde(default)]
    pub trigger: Option<TriggerKind>,
    /// Only runs started at or after
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    /// Only runs started before
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
    /// Only runs with at least one failed action
    #[serde(default)]
    pub only_failed: bool,
    /// Maximum number of reports returned
    #[serde(default)]
    pub limit: Option<usize>,
}

impl HistoryQuery {
    /// Match everything
    #[inline]
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// With trigger filter
    #[inline]
    #[must_use]
    pub fn with_trigger(mut self, trigger: TriggerKind) -> Self {
        self.trigger = Some(trigger);
        self
    }

    /// With start bound
    #[inline]
    #[must_use]
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// With end bound
    #[inline]
    #[must_use]
    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    /// Only runs with failures
    #[inline]
    #[must_use]
    pub fn failed_only(mut self) -> Self {
        self.only_failed = true;
        self
    }

    /// With result limit
    #[inline]
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `report` passes every filter
    #[must_use]
    pub fn matches(&self, report: &RecoveryReport) -> bool {
        self.trigger.map_or(true, |t| report.trigger == t)
            && self.since.map_or(true, |s| report.started_at >= s)
            && self.until.map_or(true, |u| report.started_at < u)
            && (!self.only_failed || report.failed_actions > 0)
    }
}

/// Recovery report history
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append a report
    async fn put(&self, report: &RecoveryReport) -> Result<(), StoreError>;

    /// Reports matching `query`, newest first
    async fn query(&self, query: &HistoryQuery) -> Result<Vec<RecoveryReport>, StoreError>;
}

/// In-process history with time-based retention
///
/// Backed by a moka cache whose time-to-live is the retention window, so
/// old reports age out without a sweeper. There is no size bound; reports
/// leave only by age.
#[derive(Debug, Clone)]
pub struct MemoryHistoryStore {
    inner: Cache<RunId, Arc<RecoveryReport>>,
}

impl MemoryHistoryStore {
    /// Store with default retention
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_retention(default_retention())
    }

    /// Store keeping reports for `retention`
    #[inline]
    #[must_use]
    pub fn with_retention(retention: Duration) -> Self {
        Self {
            inner: Cache::builder().time_to_live(retention).build(),
        }
    }

    /// Fetch one report by run id
    pub async fn get(&self, run_id: &RunId) -> Option<RecoveryReport> {
        self.inner.get(run_id).await.map(|report| (*report).clone())
    }

    /// Approximate number of stored reports
    #[inline]
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}

impl Default for MemoryHistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn put(&self, report: &RecoveryReport) -> Result<(), StoreError> {
        self.inner.insert(report.run_id, Arc::new(report.clone())).await;
        tracing::trace!(run_id = %report.run_id, "report stored");
        Ok(())
    }

    async fn query(&self, query: &HistoryQuery) -> Result<Vec<RecoveryReport>, StoreError> {
        let mut hits: Vec<RecoveryReport> = self
            .inner
            .iter()
            .filter(|(_, report)| query.matches(report))
            .map(|(_, report)| (*report).clone())
            .collect();

        hits.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.run_id.cmp(&a.run_id)));
        if let Some(limit) = query.limit {
            hits.truncate(limit);
        }
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mend_signal::{ActionKind, RecoveryActionSpec, RecoveryResult, TriggerId};

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn report(trigger: TriggerKind, started: i64, failed: bool) -> RecoveryReport {
        let spec = RecoveryActionSpec::new(ActionKind::RestartService, "lambda-functions", 1, 10);
        let result = if failed {
            RecoveryResult::failed(spec, 3, 1, "boom", at(started))
        } else {
            RecoveryResult::success(spec, 3, 1, serde_json::Value::Null, at(started))
        };
        RecoveryReport::assemble(
            RunId::new(),
            TriggerId::new(),
            trigger,
            false,
            at(started),
            at(started + 1),
            vec![result],
        )
    }

    #[tokio::test]
    async fn query_filters_and_orders_newest_first() {
        let store = MemoryHistoryStore::new();
        store.put(&report(TriggerKind::Alarm, 0, false)).await.unwrap();
        store.put(&report(TriggerKind::Alarm, 20, true)).await.unwrap();
        store.put(&report(TriggerKind::Manual, 10, true)).await.unwrap();

        let all = store.query(&HistoryQuery::all()).await.unwrap();
        let starts: Vec<_> = all.iter().map(|r| r.started_at).collect();
        assert_eq!(starts, vec![at(20), at(10), at(0)]);

        let alarms = store
            .query(&HistoryQuery::all().with_trigger(TriggerKind::Alarm))
            .await
            .unwrap();
        assert_eq!(alarms.len(), 2);

        let failed = store.query(&HistoryQuery::all().failed_only()).await.unwrap();
        assert_eq!(failed.len(), 2);

        let windowed = store
            .query(&HistoryQuery::all().since(at(5)).until(at(15)))
            .await
            .unwrap();
        assert_eq!(windowed.len(), 1);
        assert_eq!(windowed[0].trigger, TriggerKind::Manual);

        let limited = store.query(&HistoryQuery::all().with_limit(1)).await.unwrap();
        assert_eq!(limited[0].started_at, at(20));
    }

    #[tokio::test]
    async fn every_report_is_kept_within_retention() {
        let store = MemoryHistoryStore::with_retention(default_retention());
        for started in 0..500 {
            store.put(&report(TriggerKind::Alarm, started, false)).await.unwrap();
            store.inner.run_pending_tasks().await;
        }

        let all = store.query(&HistoryQuery::all()).await.unwrap();
        assert_eq!(all.len(), 500);
        assert_eq!(all[0].started_at, at(499));
        assert_eq!(all[499].started_at, at(0));
        assert_eq!(store.entry_count(), 500);
    }

    #[tokio::test]
    async fn get_returns_stored_report() {
        let store = MemoryHistoryStore::new();
        let report = report(TriggerKind::HealthCheck, 0, false);
        store.put(&report).await.unwrap();
        assert_eq!(store.get(&report.run_id).await, Some(report));
    }
}
