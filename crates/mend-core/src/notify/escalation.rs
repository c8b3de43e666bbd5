//! Escalation policies
//!
//! A policy is a list of levels, each with a delay measured from the first
//! notification. This module holds no timers: an external scheduler asks
//! [`EscalationPolicy::due_levels`] what is due and calls
//! `Dispatcher::notify_level` for each.

use chrono::{DateTime, Duration, Utc};
use mend_signal::{IncidentSignal, Severity};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::ConfigError;

/// Condition under which a level still fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EscalationCondition {
    /// Nobody acknowledged the incident
    #[default]
    Unacknowledged,
    /// The triggering alarm is still firing
    StillFiring,
    /// The previous level already escalated
    Escalated,
}

impl fmt::Display for EscalationCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EscalationCondition::Unacknowledged => "unacknowledged",
            EscalationCondition::StillFiring => "still-firing",
            EscalationCondition::Escalated => "escalated",
        })
    }
}

/// One stage of a policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationLevel {
    /// Minutes after first notification
    #[serde(default)]
    pub delay_minutes: u32,
    /// Channel names notified at this level
    pub channels: Vec<String>,
    /// Condition that must hold for the level to fire
    #[serde(default)]
    pub condition: EscalationCondition,
}

impl EscalationLevel {
    /// Level with the default condition
    #[must_use]
    pub fn new(delay_minutes: u32, channels: Vec<String>) -> Self {
        Self {
            delay_minutes,
            channels,
            condition: EscalationCondition::default(),
        }
    }

    /// With condition
    #[must_use]
    pub fn when(mut self, condition: EscalationCondition) -> Self {
        self.condition = condition;
        self
    }

    /// Delay as a duration
    #[must_use]
    pub fn delay(&self) -> Duration {
        Duration::minutes(i64::from(self.delay_minutes))
    }
}

/// Named, time-staged routing for unresolved incidents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationPolicy {
    /// Policy name
    pub name: String,
    /// Levels in escalation order
    pub levels: Vec<EscalationLevel>,
}

impl EscalationPolicy {
    /// Create policy
    #[must_use]
    pub fn new(name: impl Into<String>, levels: Vec<EscalationLevel>) -> Self {
        Self {
            name: name.into(),
            levels,
        }
    }

    /// Level `index`
    #[inline]
    #[must_use]
    pub fn level(&self, index: usize) -> Option<&EscalationLevel> {
        self.levels.get(index)
    }

    /// Indices of levels whose delay has elapsed
    #[must_use]
    pub fn due_levels(&self, elapsed: Duration) -> Vec<usize> {
        self.levels
            .iter()
            .enumerate()
            .filter(|(_, level)| level.delay() <= elapsed)
            .map(|(index, _)| index)
            .collect()
    }

    /// Check against the known channel names
    ///
    /// # Errors
    /// `ConfigError::Invalid` when the policy is empty, a level names an
    /// unknown channel, or delays decrease
    pub fn validate(&self, channels: &HashSet<&str>) -> Result<(), ConfigError> {
        if self.levels.is_empty() {
            return Err(ConfigError::invalid(format!("policy '{}' has no levels", self.name)));
        }
        let mut previous = 0;
        for (index, level) in self.levels.iter().enumerate() {
            if let Some(unknown) = level.channels.iter().find(|c| !channels.contains(c.as_str())) {
                return Err(ConfigError::invalid(format!(
                    "policy '{}' level {index} references unknown channel '{unknown}'",
                    self.name
                )));
            }
            if level.delay_minutes < previous {
                return Err(ConfigError::invalid(format!(
                    "policy '{}' level {index} delay {} is shorter than the previous level",
                    self.name, level.delay_minutes
                )));
            }
            previous = level.delay_minutes;
        }
        Ok(())
    }
}

/// What an escalation notifies about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationIncident {
    /// Stable incident reference (the trigger id)
    pub incident_id: String,
    /// One-line title
    pub title: String,
    /// Severity shown in templates
    pub severity: Severity,
    /// When the incident was first notified
    pub opened_at: DateTime<Utc>,
}

impl EscalationIncident {
    /// Create incident
    #[must_use]
    pub fn new(incident_id: impl Into<String>, title: impl Into<String>, opened_at: DateTime<Utc>) -> Self {
        Self {
            incident_id: incident_id.into(),
            title: title.into(),
            severity: Severity::Critical,
            opened_at,
        }
    }

    /// Incident describing a CRITICAL-class signal
    #[must_use]
    pub fn from_signal(signal: &IncidentSignal) -> Self {
        let title = match &signal.alarm {
            Some(alarm) => format!("Alarm {} is {}", alarm.name, alarm.state),
            None => {
                let names: Vec<&str> = signal
                    .unhealthy_components
                    .iter()
                    .map(|c| c.name.as_str())
                    .collect();
                if names.is_empty() {
                    format!("{} incident", signal.trigger)
                } else {
                    format!("Unhealthy: {}", names.join(", "))
                }
            }
        };
        Self::new(signal.id.to_string(), title, signal.raised_at)
    }

    /// Time since the incident opened
    #[must_use]
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        now - self.opened_at
    }
}
