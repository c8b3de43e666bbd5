//! Subcommand implementations

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use mend_core::{
    evaluate_rules, Catalog, EscalationIncident, HandlerError, HandlerRegistry, HealthAssessor, HealthError,
    LogTransport, RecoveryConfig, RecoveryOrchestrator, RemediationHandler, TransportRegistry,
};
use mend_signal::{
    ActionKind, AlarmState, ComponentHealth, HealthStatus, IncidentSignal, SystemHealth, UnhealthyComponent,
};
use mend_store::JsonFileCooldownStore;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

/// Load the file, or the built-in defaults when none is given
pub(crate) fn load_config(path: Option<&Path>) -> Result<RecoveryConfig> {
    match path {
        Some(path) => RecoveryConfig::load(path).with_context(|| format!("loading {}", path.display())),
        None => {
            tracing::debug!("no --config given; using built-in catalog");
            Ok(RecoveryConfig::default())
        }
    }
}

/// Parse `NAME=VALUE`
pub(crate) fn split_pair(raw: &str) -> Result<(&str, &str)> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected NAME=VALUE, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        bail!("empty name in '{raw}'");
    }
    Ok((name, value.trim()))
}

/// Parse `--component NAME=STATUS` values
pub(crate) fn parse_components(raw: &[String]) -> Result<Vec<(String, HealthStatus)>> {
    raw.iter()
        .map(|pair| {
            let (name, status) = split_pair(pair)?;
            let status = status.parse::<HealthStatus>()?;
            Ok((name.to_string(), status))
        })
        .collect()
}

/// Parse `--alarm NAME=STATE` values
pub(crate) fn parse_alarms(raw: &[String]) -> Result<HashMap<String, AlarmState>> {
    raw.iter()
        .map(|pair| {
            let (name, state) = split_pair(pair)?;
            Ok((name.to_string(), state.parse::<AlarmState>()?))
        })
        .collect()
}

/// Signal for the given components
pub(crate) fn build_signal(components: &[(String, HealthStatus)], trigger: &str) -> Result<IncidentSignal> {
    let now = Utc::now();
    match trigger {
        "manual" => Ok(IncidentSignal::manual(
            components
                .iter()
                .map(|(name, status)| UnhealthyComponent::new(name.as_str(), *status, now))
                .collect(),
            now,
        )),
        "health-check" => {
            let snapshot: BTreeMap<String, ComponentHealth> = components
                .iter()
                .map(|(name, status)| (name.clone(), ComponentHealth::new(*status, now)))
                .collect();
            Ok(IncidentSignal::from_health(SystemHealth::from_components(snapshot, now)))
        }
        other => bail!("unsupported trigger '{other}' (expected manual or health-check)"),
    }
}

/// Logs the action instead of performing it
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct DryRunHandler;

#[async_trait]
impl RemediationHandler for DryRunHandler {
    async fn execute(&self, kind: &ActionKind, target: &str) -> Result<serde_json::Value, HandlerError> {
        tracing::info!(action = %kind, target, "dry run: remediation not performed");
        Ok(serde_json::json!({ "dry_run": true, "action": kind.name(), "target": target }))
    }
}

/// Reports the listed components as healthy
#[derive(Debug, Clone)]
pub(crate) struct StaticHealth {
    components: Vec<String>,
}

#[async_trait]
impl HealthAssessor for StaticHealth {
    async fn assess_health(&self) -> Result<SystemHealth, HealthError> {
        let now = Utc::now();
        let components = self
            .components
            .iter()
            .map(|name| (name.clone(), ComponentHealth::new(HealthStatus::Healthy, now)))
            .collect();
        Ok(SystemHealth::from_components(components, now))
    }
}

/// Dry-run handlers for every kind in `catalog`
pub(crate) fn dry_run_registry(catalog: &Catalog) -> HandlerRegistry {
    let handler: Arc<dyn RemediationHandler> = Arc::new(DryRunHandler);
    let mut registry = HandlerRegistry::new();
    for component in catalog.components() {
        for action in catalog.actions_for(component).unwrap_or_default() {
            if !registry.supports(&action.kind) {
                registry.register(action.kind.clone(), Arc::clone(&handler));
            }
        }
    }
    registry
}

/// `mend plan`
pub(crate) fn plan(config: &RecoveryConfig, components: &[String], json: bool) -> Result<()> {
    let components = parse_components(components)?;
    let signal = build_signal(&components, "manual")?;
    let orchestrator =
        RecoveryOrchestrator::builder(Arc::new(config.catalog.clone()), Arc::new(StaticHealth { components: Vec::new() }))
            .build();
    let plan = orchestrator.plan(&signal);

    if json {
        println!("{}", serde_json::to_string_pretty(plan.actions())?);
        return Ok(());
    }
    if plan.is_empty() {
        println!("No actions planned.");
        return Ok(());
    }
    for (index, action) in plan.actions().iter().enumerate() {
        println!(
            "{:>2}. {} {} (priority {}, cooldown {}m, retries {})",
            index + 1,
            action.kind,
            action.target,
            action.priority,
            action.cooldown_minutes,
            action.max_retries
        );
    }
    Ok(())
}

/// `mend run`; returns whether the run was a total failure
pub(crate) async fn run(
    config: &RecoveryConfig,
    components: &[String],
    trigger: &str,
    state: Option<&Path>,
) -> Result<bool> {
    let components = parse_components(components)?;
    let signal = build_signal(&components, trigger)?;
    let assessor = StaticHealth {
        components: components.iter().map(|(name, _)| name.clone()).collect(),
    };

    let mut builder = RecoveryOrchestrator::from_config(
        config,
        Arc::new(assessor),
        TransportRegistry::uniform(Arc::new(LogTransport)),
    )
    .handlers(dry_run_registry(&config.catalog));
    if let Some(path) = state {
        let store = JsonFileCooldownStore::open_with_ttl(path, config.cooldown_ttl())
            .await
            .with_context(|| format!("opening cooldown state {}", path.display()))?;
        builder = builder.cooldown_store(Arc::new(store));
    }

    let report = builder.build().run_recovery(&signal).await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(report.is_total_failure())
}

/// `mend rules`
pub(crate) fn rules(config: &RecoveryConfig, alarms: &[String], json: bool) -> Result<()> {
    let states = parse_alarms(alarms)?;
    let signals = evaluate_rules(&config.composite_rules, &states, Utc::now());

    if json {
        println!("{}", serde_json::to_string_pretty(&signals)?);
        return Ok(());
    }
    if signals.is_empty() {
        println!("No composite rules firing ({} evaluated).", config.composite_rules.len());
    }
    for signal in &signals {
        if let Some(alarm) = &signal.alarm {
            let names: Vec<&str> = signal.unhealthy_components.iter().map(|c| c.name.as_str()).collect();
            println!("{} [{}] -> {}", alarm.name, alarm.severity, names.join(", "));
        }
    }
    Ok(())
}

/// Arguments of `mend escalate`
#[derive(Debug)]
pub(crate) struct EscalateArgs<'a> {
    pub(crate) policy: &'a str,
    pub(crate) level: usize,
    pub(crate) incident: &'a str,
    pub(crate) title: &'a str,
    pub(crate) resolved: bool,
}

/// `mend escalate`
pub(crate) async fn escalate(config: &RecoveryConfig, args: &EscalateArgs<'_>) -> Result<()> {
    let policy = config
        .policy(args.policy)
        .ok_or_else(|| anyhow!("unknown escalation policy '{}'", args.policy))?;
    if policy.level(args.level).is_none() {
        bail!(
            "policy '{}' has {} levels; level {} does not exist",
            policy.name,
            policy.levels.len(),
            args.level
        );
    }

    let dispatcher =
        mend_core::Dispatcher::from_config(config, TransportRegistry::uniform(Arc::new(LogTransport)));
    let now = Utc::now();
    let incident = EscalationIncident::new(args.incident, args.title, now);
    let summary = dispatcher
        .notify_level(policy, args.level, &incident, !args.resolved, now)
        .await;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mend_signal::CooldownKey;
    use mend_store::CooldownStore;

    #[test]
    fn parses_component_pairs() {
        let parsed = parse_components(&["TodoApiHealth=critical".into(), " CdnHealth = degraded ".into()]).unwrap();
        assert_eq!(
            parsed,
            vec![
                ("TodoApiHealth".to_string(), HealthStatus::Critical),
                ("CdnHealth".to_string(), HealthStatus::Degraded)
            ]
        );
        assert!(parse_components(&["TodoApiHealth".into()]).is_err());
        assert!(parse_components(&["TodoApiHealth=on-fire".into()]).is_err());
        assert!(parse_components(&["=critical".into()]).is_err());
    }

    #[test]
    fn parses_alarm_pairs() {
        let parsed = parse_alarms(&["TodoApiErrors=ALARM".into(), "TodoApiLatency=ok".into()]).unwrap();
        assert_eq!(parsed["TodoApiErrors"], AlarmState::Alarm);
        assert_eq!(parsed["TodoApiLatency"], AlarmState::Ok);
    }

    #[test]
    fn health_check_signal_is_critical_when_a_component_is() {
        let components = vec![("TodoApiHealth".to_string(), HealthStatus::Critical)];
        let signal = build_signal(&components, "health-check").unwrap();
        assert!(signal.critical);
        assert!(signal.system_health.is_some());
        assert!(build_signal(&components, "cron").is_err());
    }

    #[test]
    fn dry_run_registry_covers_catalog_kinds() {
        let registry = dry_run_registry(&Catalog::todo_defaults());
        for kind in [
            ActionKind::RestartService,
            ActionKind::ScaleUp,
            ActionKind::ClearCache,
            ActionKind::Failover,
        ] {
            assert!(registry.supports(&kind));
        }
    }

    #[tokio::test]
    async fn run_persists_cooldowns_between_invocations() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("cooldowns.json");
        let config = RecoveryConfig::default();
        let components = vec!["TodoApiHealth=critical".to_string()];

        assert!(!run(&config, &components, "manual", Some(&state)).await.unwrap());
        assert!(state.exists());

        let store = JsonFileCooldownStore::open(&state).await.unwrap();
        let key = CooldownKey::new(&ActionKind::RestartService, "lambda-functions");
        assert!(store.last_execution(&key, Utc::now()).await.unwrap().is_some());
    }

    fn shipped_config() -> RecoveryConfig {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/mend.yaml");
        load_config(Some(&path)).unwrap()
    }

    #[test]
    fn shipped_config_loads() {
        let config = shipped_config();
        assert_eq!(config.catalog, Catalog::todo_defaults());
        assert_eq!(config.critical_escalation().map(|p| p.levels.len()), Some(3));
        assert_eq!(config.composite_rules.len(), 2);
    }

    #[test]
    fn shipped_rules_fire_on_alarm_combinations() {
        let config = shipped_config();
        let states = parse_alarms(&["TodoApiErrors=ALARM".into(), "TableThrottles=ALARM".into()]).unwrap();
        let signals = evaluate_rules(&config.composite_rules, &states, Utc::now());
        assert_eq!(signals.len(), 1);
        assert!(signals[0].critical);
        assert_eq!(signals[0].unhealthy_components.len(), 2);
    }

    #[tokio::test]
    async fn escalate_rejects_unknown_policy_and_level() {
        let config = shipped_config();
        let args = EscalateArgs {
            policy: "nope",
            level: 0,
            incident: "inc-1",
            title: "API down",
            resolved: false,
        };
        assert!(escalate(&config, &args).await.is_err());
        let args = EscalateArgs { policy: "critical", level: 7, ..args };
        assert!(escalate(&config, &args).await.is_err());
        let args = EscalateArgs { level: 1, ..args };
        assert!(escalate(&config, &args).await.is_ok());
    }
}
