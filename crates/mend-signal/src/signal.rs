//! Incident signals
//!
//! An [`IncidentSignal`] is the canonical "something is unhealthy" value,
//! whatever produced it: a failed health check, an alarm state transition
//! or an operator asking for recovery by hand. One signal starts exactly one
//! recovery run and is never persisted beyond it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

use crate::error::SignalError;
use crate::health::{ComponentHealth, HealthStatus, SystemHealth};
use crate::severity::Severity;

/// Unique trigger identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TriggerId(pub Ulid);

impl TriggerId {
    /// Generate new trigger ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for TriggerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What produced the signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerKind {
    /// Scheduled health check found unhealthy components
    HealthCheck,
    /// An alarm transitioned into the alarm state
    Alarm,
    /// Operator override
    Manual,
}

impl TriggerKind {
    /// Stable kebab-case name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::HealthCheck => "health-check",
            TriggerKind::Alarm => "alarm",
            TriggerKind::Manual => "manual",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerKind {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "health-check" => Ok(TriggerKind::HealthCheck),
            "alarm" => Ok(TriggerKind::Alarm),
            "manual" => Ok(TriggerKind::Manual),
            other => Err(SignalError::UnknownTrigger(other.to_string())),
        }
    }
}

/// One component the trigger reported as unhealthy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnhealthyComponent {
    /// Component name, the catalog key
    pub name: String,
    /// Health as reported by the trigger
    pub health: ComponentHealth,
}

impl UnhealthyComponent {
    /// Create with a bare status
    #[must_use]
    pub fn new(name: impl Into<String>, status: HealthStatus, observed_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            health: ComponentHealth::new(status, observed_at),
        }
    }

    /// Shortcut for the component status
    #[inline]
    #[must_use]
    pub fn status(&self) -> HealthStatus {
        self.health.status
    }
}

/// Raw metadata of the alarm that fired
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmMetadata {
    /// Alarm name
    pub name: String,
    /// Severity declared on the alarm
    pub severity: Severity,
    /// State the alarm moved into
    pub state: String,
    /// Human-readable reason from the alarm source
    #[serde(default)]
    pub reason: String,
    /// When the transition happened
    pub transitioned_at: DateTime<Utc>,
}

/// Canonical description of unhealthy system state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentSignal {
    /// Trigger identifier, carried through to the report
    pub id: TriggerId,
    /// What produced the signal
    pub trigger: TriggerKind,
    /// Whole-system snapshot taken when the trigger fired
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_health: Option<SystemHealth>,
    /// Unhealthy components in trigger order
    pub unhealthy_components: Vec<UnhealthyComponent>,
    /// Alarm that fired, for alarm triggers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alarm: Option<AlarmMetadata>,
    /// Whether the triggering condition is CRITICAL-class
    #[serde(default)]
    pub critical: bool,
    /// When the signal was created
    pub raised_at: DateTime<Utc>,
}

impl IncidentSignal {
    /// Signal from a health-check snapshot.
    ///
    /// Non-healthy components become the unhealthy list, in name order. The
    /// signal is CRITICAL-class when any component is critical.
    #[must_use]
    pub fn from_health(health: SystemHealth) -> Self {
        let unhealthy_components: Vec<UnhealthyComponent> = health
            .unhealthy()
            .map(|(name, component)| UnhealthyComponent {
                name: name.clone(),
                health: component.clone(),
            })
            .collect();
        let critical = unhealthy_components
            .iter()
            .any(|c| c.status() == HealthStatus::Critical);

        Self {
            id: TriggerId::new(),
            trigger: TriggerKind::HealthCheck,
            raised_at: health.assessed_at,
            system_health: Some(health),
            unhealthy_components,
            alarm: None,
            critical,
        }
    }

    /// Signal from an alarm transition; inherits the alarm's severity class
    #[must_use]
    pub fn from_alarm(alarm: AlarmMetadata, components: Vec<UnhealthyComponent>) -> Self {
        Self {
            id: TriggerId::new(),
            trigger: TriggerKind::Alarm,
            system_health: None,
            unhealthy_components: components,
            critical: alarm.severity == Severity::Critical,
            raised_at: alarm.transitioned_at,
            alarm: Some(alarm),
        }
    }

    /// Operator-requested recovery; never CRITICAL-class
    #[must_use]
    pub fn manual(components: Vec<UnhealthyComponent>, raised_at: DateTime<Utc>) -> Self {
        Self {
            id: TriggerId::new(),
            trigger: TriggerKind::Manual,
            system_health: None,
            unhealthy_components: components,
            alarm: None,
            critical: false,
            raised_at,
        }
    }

    /// Attach a pre-recovery snapshot
    #[inline]
    #[must_use]
    pub fn with_system_health(mut self, health: SystemHealth) -> Self {
        self.system_health = Some(health);
        self
    }

    /// Whether anything is actually unhealthy
    #[inline]
    #[must_use]
    pub fn has_unhealthy(&self) -> bool {
        self.unhealthy_components
            .iter()
            .any(|c| c.status().is_unhealthy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn at() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn health_signal_lists_unhealthy_in_name_order() {
        let mut components = BTreeMap::new();
        components.insert("Zeta".to_string(), ComponentHealth::new(HealthStatus::Degraded, at()));
        components.insert("Alpha".to_string(), ComponentHealth::new(HealthStatus::Critical, at()));
        components.insert("Mid".to_string(), ComponentHealth::new(HealthStatus::Healthy, at()));

        let signal = IncidentSignal::from_health(SystemHealth::from_components(components, at()));
        let names: Vec<_> = signal
            .unhealthy_components
            .iter()
            .map(|c| c.name.as_str())
            .collect();

        assert_eq!(names, vec!["Alpha", "Zeta"]);
        assert_eq!(signal.trigger, TriggerKind::HealthCheck);
        assert!(signal.critical);
        assert!(signal.system_health.is_some());
    }

    #[test]
    fn alarm_signal_inherits_severity_class() {
        let alarm = AlarmMetadata {
            name: "TodoApiErrors".to_string(),
            severity: Severity::Warning,
            state: "ALARM".to_string(),
            reason: "threshold crossed".to_string(),
            transitioned_at: at(),
        };
        let signal = IncidentSignal::from_alarm(alarm, vec![]);
        assert!(!signal.critical);
        assert_eq!(signal.trigger, TriggerKind::Alarm);
    }

    #[test]
    fn manual_signal_is_never_critical() {
        let signal = IncidentSignal::manual(
            vec![UnhealthyComponent::new("TodoApiHealth", HealthStatus::Critical, at())],
            at(),
        );
        assert!(!signal.critical);
        assert!(signal.has_unhealthy());
    }

    #[test]
    fn trigger_kind_round_trips_through_serde() {
        let json = serde_json::to_string(&TriggerKind::HealthCheck).unwrap();
        assert_eq!(json, "\"health-check\"");
        assert_eq!("manual".parse::<TriggerKind>().unwrap(), TriggerKind::Manual);
    }
}
