//! Composite alarm rules
//!
//! A rule fires when its expression holds over the current alarm states.
//! Each firing rule becomes one alarm-triggered signal.

use chrono::{DateTime, Utc};
use mend_signal::{
    AlarmExpr, AlarmMetadata, AlarmState, HealthStatus, IncidentSignal, Severity, UnhealthyComponent,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn default_severity() -> Severity {
    Severity::Warning
}

/// Named composite alarm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeRule {
    /// Rule name, reported as the alarm name
    pub name: String,
    /// Expression over member alarms
    pub expression: AlarmExpr,
    /// Severity of the resulting signal
    #[serde(default = "default_severity")]
    pub severity: Severity,
    /// Components reported unhealthy when the rule fires
    #[serde(default)]
    pub components: Vec<String>,
}

impl CompositeRule {
    /// Create rule
    #[must_use]
    pub fn new(name: impl Into<String>, expression: AlarmExpr, severity: Severity) -> Self {
        Self {
            name: name.into(),
            expression,
            severity,
            components: Vec::new(),
        }
    }

    /// With affected component
    #[must_use]
    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.components.push(component.into());
        self
    }

    /// Whether the rule fires over `states`
    #[inline]
    #[must_use]
    pub fn fires(&self, states: &HashMap<String, AlarmState>) -> bool {
        self.expression.evaluate(states)
    }

    /// Status assigned to the rule's components
    #[inline]
    #[must_use]
    pub fn component_status(&self) -> HealthStatus {
        if self.severity == Severity::Critical {
            HealthStatus::Critical
        } else {
            HealthStatus::Degraded
        }
    }

    /// Signal raised by this rule
    #[must_use]
    pub fn signal(&self, states: &HashMap<String, AlarmState>, at: DateTime<Utc>) -> IncidentSignal {
        let firing: Vec<&str> = self
            .expression
            .alarm_names()
            .into_iter()
            .filter(|name| states.get(*name) == Some(&AlarmState::Alarm))
            .collect();
        let status = self.component_status();
        let components = self
            .components
            .iter()
            .map(|name| UnhealthyComponent::new(name.as_str(), status, at))
            .collect();

        IncidentSignal::from_alarm(
            AlarmMetadata {
                name: self.name.clone(),
                severity: self.severity,
                state: "ALARM".to_string(),
                reason: format!("{} (in alarm: {})", self.expression, firing.join(", ")),
                transitioned_at: at,
            },
            components,
        )
    }
}

/// One signal per firing rule, in rule order
#[must_use]
pub fn evaluate_rules(
    rules: &[CompositeRule],
    states: &HashMap<String, AlarmState>,
    at: DateTime<Utc>,
) -> Vec<IncidentSignal> {
    rules
        .iter()
        .filter(|rule| rule.fires(states))
        .inspect(|rule| tracing::info!(rule = %rule.name, severity = %rule.severity, "composite rule firing"))
        .map(|rule| rule.signal(states, at))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mend_signal::TriggerKind;

    fn at() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn states(pairs: &[(&str, AlarmState)]) -> HashMap<String, AlarmState> {
        pairs.iter().map(|(n, s)| ((*n).to_string(), *s)).collect()
    }

    fn rules() -> Vec<CompositeRule> {
        vec![
            CompositeRule::new(
                "TodoApiDown",
                "ALARM(TodoApiErrors) AND ALARM(TodoApiLatency)".parse().unwrap(),
                Severity::Critical,
            )
            .with_component("TodoApiHealth"),
            CompositeRule::new(
                "StorageTrouble",
                "ALARM(TableThrottles) OR ALARM(TableErrors)".parse().unwrap(),
                Severity::Warning,
            )
            .with_component("DatabaseHealth"),
        ]
    }

    #[test]
    fn only_firing_rules_raise_signals() {
        let states = states(&[
            ("TodoApiErrors", AlarmState::Alarm),
            ("TodoApiLatency", AlarmState::Ok),
            ("TableThrottles", AlarmState::Alarm),
        ]);
        let signals = evaluate_rules(&rules(), &states, at());
        assert_eq!(signals.len(), 1);

        let signal = &signals[0];
        assert_eq!(signal.trigger, TriggerKind::Alarm);
        assert!(!signal.critical);
        assert_eq!(signal.unhealthy_components[0].name, "DatabaseHealth");
        assert_eq!(signal.unhealthy_components[0].status(), HealthStatus::Degraded);
        assert!(signal.alarm.as_ref().unwrap().reason.contains("TableThrottles"));
    }

    #[test]
    fn critical_rule_marks_components_critical() {
        let states = states(&[
            ("TodoApiErrors", AlarmState::Alarm),
            ("TodoApiLatency", AlarmState::Alarm),
        ]);
        let signals = evaluate_rules(&rules(), &states, at());
        assert_eq!(signals.len(), 1);
        assert!(signals[0].critical);
        assert_eq!(signals[0].unhealthy_components[0].status(), HealthStatus::Critical);
    }

    #[test]
    fn rule_deserializes_from_text_expression() {
        let rule: CompositeRule = serde_json::from_value(serde_json::json!({
            "name": "Nested",
            "expression": "ALARM(a) AND (ALARM(b) OR ALARM(c))",
            "components": ["CacheHealth"]
        }))
        .unwrap();
        assert_eq!(rule.severity, Severity::Warning);
        assert!(rule.fires(&states(&[("a", AlarmState::Alarm), ("c", AlarmState::Alarm)])));
        assert!(!rule.fires(&states(&[("a", AlarmState::Alarm), ("c", AlarmState::InsufficientData)])));
    }
}
