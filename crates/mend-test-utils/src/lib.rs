//! Testing utilities for the Mend workspace
//!
//! Scripted collaborator doubles, a manual clock and signal fixtures.

#![allow(missing_docs)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use mend_core::{
    Catalog, Clock, HandlerError, HealthAssessor, HealthError, MetricUnit, MetricsBackend,
    MetricsError, RemediationHandler, RenderedMessage, Transport, TransportError,
};
use mend_signal::{
    ActionKind, AlarmMetadata, ComponentHealth, CooldownKey, HealthStatus, IncidentSignal,
    RecoveryActionSpec, RecoveryReport, Severity, SystemHealth, UnhealthyComponent,
};
use mend_store::{Claim, CooldownStore, HistoryQuery, HistoryStore, StoreError};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Fixed base instant used by fixtures
pub fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

// ---------------------------------------------------------------------------
// Remediation handlers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    Fail(String),
    Panic(String),
    /// Fail this many times, then succeed
    Flaky(u32),
}

/// Handler whose outcome is scripted per target; unknown targets succeed
#[derive(Debug, Default)]
pub struct ScriptedHandler {
    scripts: Mutex<HashMap<String, Behavior>>,
    calls: Mutex<Vec<(ActionKind, String)>>,
}

impl ScriptedHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, target: &str, behavior: Behavior) -> Self {
        self.scripts.lock().insert(target.to_string(), behavior);
        self
    }

    pub fn failing(self, target: &str, message: &str) -> Self {
        self.with(target, Behavior::Fail(message.to_string()))
    }

    /// Every invocation in order
    pub fn calls(&self) -> Vec<(ActionKind, String)> {
        self.calls.lock().clone()
    }

    pub fn targets(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(_, t)| t.clone()).collect()
    }
}

#[async_trait]
impl RemediationHandler for ScriptedHandler {
    async fn execute(&self, kind: &ActionKind, target: &str) -> Result<serde_json::Value, HandlerError> {
        self.calls.lock().push((kind.clone(), target.to_string()));

        let behavior = {
            let mut scripts = self.scripts.lock();
            match scripts.get_mut(target) {
                Some(Behavior::Flaky(remaining)) if *remaining > 0 => {
                    *remaining -= 1;
                    Behavior::Fail(format!("{target} not ready"))
                }
                Some(behavior) => behavior.clone(),
                None => Behavior::Succeed,
            }
        };

        match behavior {
            Behavior::Succeed | Behavior::Flaky(_) => {
                Ok(serde_json::json!({ "kind": kind.name(), "target": target }))
            }
            Behavior::Fail(message) => Err(HandlerError::failed(message)),
            Behavior::Panic(message) => panic!("{message}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StaticHealth(pub SystemHealth);

impl StaticHealth {
    pub fn healthy() -> Self {
        Self(SystemHealth::from_components(BTreeMap::new(), at(0)))
    }

    pub fn with(components: &[(&str, HealthStatus)]) -> Self {
        Self(health_snapshot(components))
    }
}

#[async_trait]
impl HealthAssessor for StaticHealth {
    async fn assess_health(&self) -> Result<SystemHealth, HealthError> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FailingHealth;

#[async_trait]
impl HealthAssessor for FailingHealth {
    async fn assess_health(&self) -> Result<SystemHealth, HealthError> {
        Err(HealthError::Unavailable("health endpoint timed out".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub name: String,
    pub value: f64,
    pub unit: MetricUnit,
    pub dimensions: Vec<(String, String)>,
}

#[derive(Debug, Default)]
pub struct RecordingMetrics {
    published: Mutex<Vec<Published>>,
    fail: bool,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend that rejects every publish
    pub fn failing() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn published(&self) -> Vec<Published> {
        self.published.lock().clone()
    }

    pub fn value_of(&self, name: &str) -> Option<f64> {
        self.published
            .lock()
            .iter()
            .rev()
            .find(|p| p.name == name)
            .map(|p| p.value)
    }
}

#[async_trait]
impl MetricsBackend for RecordingMetrics {
    async fn publish(
        &self,
        name: &str,
        value: f64,
        unit: MetricUnit,
        dimensions: &[(String, String)],
    ) -> Result<(), MetricsError> {
        if self.fail {
            return Err(MetricsError {
                name: name.to_string(),
                message: "backend unavailable".to_string(),
            });
        }
        self.published.lock().push(Published {
            name: name.to_string(),
            value,
            unit,
            dimensions: dimensions.to_vec(),
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Transports
// ---------------------------------------------------------------------------

/// Records deliveries; destinations marked failing return an error
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(String, RenderedMessage)>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(self, destination: &str) -> Self {
        self.failing.lock().insert(destination.to_string());
        self
    }

    pub fn sent(&self) -> Vec<(String, RenderedMessage)> {
        self.sent.lock().clone()
    }

    pub fn destinations(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(d, _)| d.clone()).collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, message: &RenderedMessage, destination: &str) -> Result<(), TransportError> {
        if self.failing.lock().contains(destination) {
            return Err(TransportError::DeliveryFailed {
                destination: destination.to_string(),
                message: "connection reset".to_string(),
            });
        }
        self.sent.lock().push((destination.to_string(), message.clone()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Stores
// ---------------------------------------------------------------------------

/// Cooldown store whose every operation fails
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingCooldownStore;

#[async_trait]
impl CooldownStore for FailingCooldownStore {
    async fn last_execution(
        &self,
        _key: &CooldownKey,
        _now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        Err(StoreError::Unavailable("cooldown table unreachable".to_string()))
    }

    async fn record_execution(&self, _key: &CooldownKey, _at: DateTime<Utc>) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("cooldown table unreachable".to_string()))
    }

    async fn try_claim(
        &self,
        _key: &CooldownKey,
        _cooldown: Duration,
        _now: DateTime<Utc>,
    ) -> Result<Claim, StoreError> {
        Err(StoreError::Unavailable("cooldown table unreachable".to_string()))
    }
}

/// History store whose every operation fails
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingHistoryStore;

#[async_trait]
impl HistoryStore for FailingHistoryStore {
    async fn put(&self, _report: &RecoveryReport) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("history table unreachable".to_string()))
    }

    async fn query(&self, _query: &HistoryQuery) -> Result<Vec<RecoveryReport>, StoreError> {
        Err(StoreError::Unavailable("history table unreachable".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// `TodoApiHealth -> [restart-service/lambda-functions p1 10m, clear-cache/api-gateway p2 5m]`
pub fn todo_api_catalog() -> Catalog {
    Catalog::default().with_component(
        "TodoApiHealth",
        vec![
            RecoveryActionSpec::new(ActionKind::RestartService, "lambda-functions", 1, 10),
            RecoveryActionSpec::new(ActionKind::ClearCache, "api-gateway", 2, 5),
        ],
    )
}

pub fn components(pairs: &[(&str, HealthStatus)]) -> Vec<UnhealthyComponent> {
    pairs
        .iter()
        .map(|(name, status)| UnhealthyComponent::new(*name, *status, at(0)))
        .collect()
}

pub fn health_snapshot(pairs: &[(&str, HealthStatus)]) -> SystemHealth {
    let components = pairs
        .iter()
        .map(|(name, status)| ((*name).to_string(), ComponentHealth::new(*status, at(0))))
        .collect();
    SystemHealth::from_components(components, at(0))
}

pub fn alarm_signal(severity: Severity, pairs: &[(&str, HealthStatus)]) -> IncidentSignal {
    IncidentSignal::from_alarm(
        AlarmMetadata {
            name: "TodoApiErrors".to_string(),
            severity,
            state: "ALARM".to_string(),
            reason: "Threshold Crossed: 1 datapoint [12.0] was greater than the threshold (5.0)"
                .to_string(),
            transitioned_at: at(0),
        },
        components(pairs),
    )
}

pub fn manual_signal(pairs: &[(&str, HealthStatus)]) -> IncidentSignal {
    IncidentSignal::manual(components(pairs), at(0))
}
