//! Static recovery configuration
//!
//! One immutable [`RecoveryConfig`] value is built at startup and injected
//! into the planner, dispatcher and trigger evaluation. Files are YAML or
//! TOML, chosen by extension.

use mend_signal::{ActionKind, RecoveryActionSpec};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::error::ConfigError;
use crate::notify::channel::{BusinessHours, NotificationChannel};
use crate::notify::escalation::EscalationPolicy;
use crate::planner::malformed_reason;
use crate::triggers::CompositeRule;

/// Component name to ordered action list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog(BTreeMap<String, Vec<RecoveryActionSpec>>);

impl Catalog {
    /// Catalog from explicit entries
    #[inline]
    #[must_use]
    pub fn new(entries: BTreeMap<String, Vec<RecoveryActionSpec>>) -> Self {
        Self(entries)
    }

    /// Built-in catalog of the to-do service
    #[must_use]
    pub fn todo_defaults() -> Self {
        use ActionKind::{ClearCache, Failover, RestartService, ScaleUp};

        let mut entries = BTreeMap::new();
        entries.insert(
            "TodoApiHealth".to_string(),
            vec![
                RecoveryActionSpec::new(RestartService, "lambda-functions", 1, 10).with_retries(1),
                RecoveryActionSpec::new(ClearCache, "api-gateway", 2, 5),
                RecoveryActionSpec::new(ScaleUp, "lambda-concurrency", 3, 15),
            ],
        );
        entries.insert(
            "DatabaseHealth".to_string(),
            vec![
                RecoveryActionSpec::new(ScaleUp, "dynamodb-tables", 2, 15).with_retries(1),
                RecoveryActionSpec::new(Failover, "dynamodb-global-table", 4, 60),
            ],
        );
        entries.insert(
            "CacheHealth".to_string(),
            vec![
                RecoveryActionSpec::new(ClearCache, "api-gateway", 1, 5),
                RecoveryActionSpec::new(RestartService, "cache-cluster", 3, 10),
            ],
        );
        entries.insert(
            "CdnHealth".to_string(),
            vec![RecoveryActionSpec::new(ClearCache, "cloudfront-distribution", 2, 10)],
        );
        Self(entries)
    }

    /// Actions cataloged for `component`
    #[inline]
    #[must_use]
    pub fn actions_for(&self, component: &str) -> Option<&[RecoveryActionSpec]> {
        self.0.get(component).map(Vec::as_slice)
    }

    /// Cataloged component names
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Add or replace a component entry
    #[must_use]
    pub fn with_component(mut self, component: impl Into<String>, actions: Vec<RecoveryActionSpec>) -> Self {
        self.0.insert(component.into(), actions);
        self
    }

    /// Number of components
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no component is cataloged
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Links substituted into notification templates
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Links {
    /// Operations dashboard
    #[serde(default)]
    pub dashboard_url: Option<String>,
    /// Log search
    #[serde(default)]
    pub logs_url: Option<String>,
}

fn default_cooldown_ttl_days() -> u32 {
    7
}

fn default_history_retention_days() -> u32 {
    30
}

/// Complete static configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Component catalog
    #[serde(default = "Catalog::todo_defaults")]
    pub catalog: Catalog,
    /// Notification channels
    #[serde(default)]
    pub channels: Vec<NotificationChannel>,
    /// Escalation policies
    #[serde(default)]
    pub escalation_policies: Vec<EscalationPolicy>,
    /// Policy applied to CRITICAL-class signals
    #[serde(default)]
    pub critical_policy: Option<String>,
    /// Window for business-hours-only channels
    #[serde(default)]
    pub business_hours: BusinessHours,
    /// Template links
    #[serde(default)]
    pub links: Links,
    /// Lifetime of cooldown records
    #[serde(default = "default_cooldown_ttl_days")]
    pub cooldown_ttl_days: u32,
    /// How long reports stay in history
    #[serde(default = "default_history_retention_days")]
    pub history_retention_days: u32,
    /// Composite alarm rules
    #[serde(default)]
    pub composite_rules: Vec<CompositeRule>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            catalog: Catalog::todo_defaults(),
            channels: Vec::new(),
            escalation_policies: Vec::new(),
            critical_policy: None,
            business_hours: BusinessHours::default(),
            links: Links::default(),
            cooldown_ttl_days: default_cooldown_ttl_days(),
            history_retention_days: default_history_retention_days(),
            composite_rules: Vec::new(),
        }
    }
}

impl RecoveryConfig {
    /// Load and validate a YAML or TOML file
    ///
    /// # Errors
    /// - `ConfigError::Io` if the file cannot be read
    /// - `ConfigError::UnsupportedFormat` for other extensions
    /// - `ConfigError::Yaml`/`ConfigError::Toml` on parse errors
    /// - `ConfigError::Invalid` if validation fails
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let config = match extension.as_str() {
            "yaml" | "yml" => Self::from_yaml_str(&content)?,
            "toml" => Self::from_toml_str(&content)?,
            other => return Err(ConfigError::UnsupportedFormat(other.to_string())),
        };
        tracing::debug!(
            path = %path.display(),
            components = config.catalog.len(),
            channels = config.channels.len(),
            "configuration loaded"
        );
        Ok(config)
    }

    /// Parse and validate YAML
    ///
    /// # Errors
    /// Parse or validation errors
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate TOML
    ///
    /// # Errors
    /// Parse or validation errors
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross references and ranges
    ///
    /// Malformed catalog entries are only warned about; the planner skips
    /// their component at plan time.
    ///
    /// # Errors
    /// `ConfigError::Invalid` describing the first problem found
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for channel in &self.channels {
            if !names.insert(channel.name.as_str()) {
                return Err(ConfigError::invalid(format!(
                    "duplicate channel '{}'",
                    channel.name
                )));
            }
        }

        let mut policies = HashSet::new();
        for policy in &self.escalation_policies {
            if !policies.insert(policy.name.as_str()) {
                return Err(ConfigError::invalid(format!(
                    "duplicate escalation policy '{}'",
                    policy.name
                )));
            }
            policy.validate(&names)?;
        }

        if let Some(critical) = &self.critical_policy {
            if !policies.contains(critical.as_str()) {
                return Err(ConfigError::invalid(format!(
                    "critical policy '{critical}' is not defined"
                )));
            }
        }

        self.business_hours.validate()?;

        for (component, actions) in &self.catalog.0 {
            for action in actions {
                if let Some(reason) = malformed_reason(action) {
                    tracing::warn!(component, action = %action.kind, reason, "malformed catalog entry");
                }
            }
        }
        Ok(())
    }

    /// Look up an escalation policy
    #[must_use]
    pub fn policy(&self, name: &str) -> Option<&EscalationPolicy> {
        self.escalation_policies.iter().find(|p| p.name == name)
    }

    /// Policy applied to CRITICAL-class signals, if configured
    #[must_use]
    pub fn critical_escalation(&self) -> Option<&EscalationPolicy> {
        self.critical_policy.as_deref().and_then(|name| self.policy(name))
    }

    /// Cooldown record TTL
    #[must_use]
    pub fn cooldown_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.cooldown_ttl_days))
    }

    /// History retention window
    #[must_use]
    pub fn history_retention(&self) -> std::time::Duration {
        std::time::Duration::from_secs(u64::from(self.history_retention_days) * 24 * 60 * 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mend_signal::Severity;
    use std::io::Write;

    const YAML: &str = r#"
catalog:
  TodoApiHealth:
    - kind: restart-service
      target: lambda-functions
      priority: 1
      cooldown_minutes: 10
    - kind: clear-cache
      target: api-gateway
      priority: 2
      cooldown_minutes: 5
      max_retries: 2
channels:
  - name: ops-chat
    transport: chat
    destination: "https://chat.example.com/hooks/ops"
    severities: [INFO, WARNING]
  - name: oncall-pager
    transport: pager
    destination: "oncall"
    severities: [CRITICAL]
    rate_limit_minutes: 15
escalation_policies:
  - name: critical
    levels:
      - delay_minutes: 0
        channels: [oncall-pager]
      - delay_minutes: 15
        channels: [oncall-pager, ops-chat]
        condition: still-firing
critical_policy: critical
business_hours:
  start_hour: 9
  end_hour: 17
"#;

    #[test]
    fn parses_yaml() {
        let config = RecoveryConfig::from_yaml_str(YAML).unwrap();
        let actions = config.catalog.actions_for("TodoApiHealth").unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[1].max_retries, 2);
        assert_eq!(actions[0].max_retries, 0);
        assert!(config.channels[0].severities.contains(&Severity::Warning));
        assert_eq!(config.critical_escalation().unwrap().levels.len(), 2);
        assert_eq!(config.cooldown_ttl_days, 7);
        assert_eq!(config.history_retention_days, 30);
    }

    #[test]
    fn parses_toml() {
        let toml = r#"
critical_policy = "page"

[[channels]]
name = "ops-email"
transport = "email"
destination = "ops@example.com"
severities = ["WARNING", "CRITICAL"]
business_hours_only = true

[[escalation_policies]]
name = "page"

[[escalation_policies.levels]]
delay_minutes = 0
channels = ["ops-email"]
"#;
        let config = RecoveryConfig::from_toml_str(toml).unwrap();
        assert!(config.channels[0].business_hours_only);
        assert!(config.catalog.actions_for("TodoApiHealth").is_some());
    }

    #[test]
    fn rejects_inconsistent_config() {
        let duplicate = YAML.replace("name: oncall-pager", "name: ops-chat");
        assert!(matches!(
            RecoveryConfig::from_yaml_str(&duplicate),
            Err(ConfigError::Invalid(_))
        ));

        let unknown_policy = YAML.replace("critical_policy: critical", "critical_policy: nope");
        assert!(matches!(
            RecoveryConfig::from_yaml_str(&unknown_policy),
            Err(ConfigError::Invalid(_))
        ));

        let bad_hours = YAML.replace("end_hour: 17", "end_hour: 25");
        assert!(matches!(
            RecoveryConfig::from_yaml_str(&bad_hours),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn load_picks_format_by_extension() {
        let dir = tempfile::tempdir().unwrap();

        let yaml_path = dir.path().join("mend.yaml");
        std::fs::File::create(&yaml_path)
            .unwrap()
            .write_all(YAML.as_bytes())
            .unwrap();
        assert!(RecoveryConfig::load(&yaml_path).is_ok());

        let json_path = dir.path().join("mend.json");
        std::fs::write(&json_path, "{}").unwrap();
        assert!(matches!(
            RecoveryConfig::load(&json_path),
            Err(ConfigError::UnsupportedFormat(_))
        ));

        assert!(matches!(
            RecoveryConfig::load(dir.path().join("missing.yaml")),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn todo_defaults_cover_the_service() {
        let catalog = Catalog::todo_defaults();
        let names: Vec<_> = catalog.components().collect();
        assert_eq!(
            names,
            vec!["CacheHealth", "CdnHealth", "DatabaseHealth", "TodoApiHealth"]
        );
        let api = catalog.actions_for("TodoApiHealth").unwrap();
        assert_eq!(api[0].kind, ActionKind::RestartService);
        assert_eq!(api[0].cooldown_minutes, 10);
        assert_eq!(api[1].target, "api-gateway");
    }
}
