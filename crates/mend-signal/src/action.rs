//! Recovery actions and their outcomes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Remediation action kind
///
/// Serialized as its kebab-case name; custom actions serialize as
/// `custom:<name>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ActionKind {
    /// Restart the target service
    RestartService,
    /// Add capacity to the target
    ScaleUp,
    /// Flush the target cache
    ClearCache,
    /// Fail the target over to its standby
    Failover,
    /// Deployment-specific action handled by a named handler
    Custom(String),
}

impl ActionKind {
    /// Stable name, also the handler registry key
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            ActionKind::RestartService => "restart-service".to_string(),
            ActionKind::ScaleUp => "scale-up".to_string(),
            ActionKind::ClearCache => "clear-cache".to_string(),
            ActionKind::Failover => "failover".to_string(),
            ActionKind::Custom(name) => format!("custom:{name}"),
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "restart-service" => Ok(ActionKind::RestartService),
            "scale-up" => Ok(ActionKind::ScaleUp),
            "clear-cache" => Ok(ActionKind::ClearCache),
            "failover" => Ok(ActionKind::Failover),
            other => match other.strip_prefix("custom:") {
                Some(name) if !name.is_empty() => Ok(ActionKind::Custom(name.to_string())),
                _ => Err(format!("unknown action kind: '{other}'")),
            },
        }
    }
}

impl TryFrom<String> for ActionKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ActionKind> for String {
    fn from(kind: ActionKind) -> Self {
        kind.name()
    }
}

/// Durable key identifying one action against one target
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CooldownKey(String);

impl CooldownKey {
    /// Key for `kind` against `target`
    #[must_use]
    pub fn new(kind: &ActionKind, target: &str) -> Self {
        Self(format!("{kind}:{target}"))
    }

    /// Raw key string
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CooldownKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CooldownKey {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

/// Catalog entry describing one remediation action
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecoveryActionSpec {
    /// What to do
    pub kind: ActionKind,
    /// What to do it to
    pub target: String,
    /// Lower runs first; 1 and 2 are the conservative tiers
    pub priority: u8,
    /// Minimum minutes between runs against the same target
    pub cooldown_minutes: u32,
    /// Immediate re-invocations allowed before giving up
    #[serde(default)]
    pub max_retries: u32,
}

impl RecoveryActionSpec {
    /// Create spec with no retries
    #[must_use]
    pub fn new(kind: ActionKind, target: impl Into<String>, priority: u8, cooldown_minutes: u32) -> Self {
        Self {
            kind,
            target: target.into(),
            priority,
            cooldown_minutes,
            max_retries: 0,
        }
    }

    /// With retry budget
    #[inline]
    #[must_use]
    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Cooldown as a duration
    #[inline]
    #[must_use]
    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.cooldown_minutes))
    }

    /// Cooldown store key (`kind:target`)
    #[inline]
    #[must_use]
    pub fn cooldown_key(&self) -> CooldownKey {
        CooldownKey::new(&self.kind, &self.target)
    }

    /// Identity used for plan deduplication
    #[inline]
    #[must_use]
    pub fn identity(&self) -> (&ActionKind, &str) {
        (&self.kind, self.target.as_str())
    }
}

/// Outcome of one action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionStatus {
    /// Handler reported success
    Success,
    /// Handler failed on every attempt, or no handler exists
    Failed,
    /// Not run (cooldown active)
    Skipped,
}

impl ActionStatus {
    /// Lowercase name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Success => "success",
            ActionStatus::Failed => "failed",
            ActionStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of one planned action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryResult {
    /// The action as planned
    pub action: RecoveryActionSpec,
    /// What happened
    pub status: ActionStatus,
    /// Wall-clock time spent in the handler, all attempts included
    pub duration_ms: u64,
    /// Handler output, error text, or skip reason
    pub details: serde_json::Value,
    /// When the result was recorded
    pub timestamp: DateTime<Utc>,
}

impl RecoveryResult {
    /// Successful action
    #[must_use]
    pub fn success(
        action: RecoveryActionSpec,
        duration_ms: u64,
        attempts: u32,
        output: serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            action,
            status: ActionStatus::Success,
            duration_ms,
            details: serde_json::json!({ "attempts": attempts, "output": output }),
            timestamp,
        }
    }

    /// Failed action carrying the last error message
    #[must_use]
    pub fn failed(
        action: RecoveryActionSpec,
        duration_ms: u64,
        attempts: u32,
        error: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            action,
            status: ActionStatus::Failed,
            duration_ms,
            details: serde_json::json!({ "attempts": attempts, "error": error.into() }),
            timestamp,
        }
    }

    /// Action that never ran
    #[must_use]
    pub fn skipped(
        action: RecoveryActionSpec,
        reason: impl Into<String>,
        extra: serde_json::Map<String, serde_json::Value>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let mut details = extra;
        details.insert("reason".to_string(), serde_json::Value::String(reason.into()));
        Self {
            action,
            status: ActionStatus::Skipped,
            duration_ms: 0,
            details: serde_json::Value::Object(details),
            timestamp,
        }
    }

    /// Error message of a failed result
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.details.get("error").and_then(serde_json::Value::as_str)
    }

    /// Skip reason of a skipped result
    #[must_use]
    pub fn skip_reason(&self) -> Option<&str> {
        self.details.get("reason").and_then(serde_json::Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(ActionKind::RestartService.to_string(), "restart-service");
        assert_eq!(ActionKind::Custom("drain-queue".into()).to_string(), "custom:drain-queue");
        assert_eq!("failover".parse::<ActionKind>().unwrap(), ActionKind::Failover);
        assert_eq!(
            "custom:drain-queue".parse::<ActionKind>().unwrap(),
            ActionKind::Custom("drain-queue".into())
        );
        assert!("custom:".parse::<ActionKind>().is_err());
        assert!("reboot".parse::<ActionKind>().is_err());
    }

    #[test]
    fn spec_deserializes_from_catalog_shape() {
        let spec: RecoveryActionSpec = serde_json::from_value(serde_json::json!({
            "kind": "restart-service",
            "target": "lambda-functions",
            "priority": 1,
            "cooldown_minutes": 10
        }))
        .unwrap();

        assert_eq!(spec.kind, ActionKind::RestartService);
        assert_eq!(spec.max_retries, 0);
        assert_eq!(spec.cooldown_key().as_str(), "restart-service:lambda-functions");
        assert_eq!(spec.cooldown(), chrono::Duration::minutes(10));
    }

    #[test]
    fn result_accessors() {
        let spec = RecoveryActionSpec::new(ActionKind::ClearCache, "api-gateway", 2, 5);
        let at = DateTime::from_timestamp(0, 0).unwrap();

        let failed = RecoveryResult::failed(spec.clone(), 12, 1, "cache unreachable", at);
        assert_eq!(failed.error_message(), Some("cache unreachable"));

        let skipped = RecoveryResult::skipped(spec, "cooldown active", serde_json::Map::new(), at);
        assert_eq!(skipped.skip_reason(), Some("cooldown active"));
        assert_eq!(skipped.duration_ms, 0);
    }
}
