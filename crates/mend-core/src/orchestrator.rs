//! Recovery orchestrator
//!
//! Drives one recovery run per incident signal through a strictly linear
//! state machine:
//!
//! ```text
//! Planning -> Filtering -> Executing -> Verifying -> Reporting -> Notified
//! ```
//!
//! Every stage turns its failures into data (skipped or failed results, an
//! unavailable health payload, a dispatch summary) and the run always
//! advances. [`RecoveryOrchestrator::run_recovery`] therefore cannot fail.
//! Concurrent runs share only the cooldown store.

use mend_signal::{IncidentSignal, RecoveryReport, RunId, RunStage};
use mend_store::{CooldownStore, HistoryStore, MemoryCooldownStore, MemoryHistoryStore};
use std::sync::Arc;
use tracing::Instrument;

use crate::clock::{Clock, SystemClock};
use crate::config::{Catalog, RecoveryConfig};
use crate::executor::{ActionExecutor, HandlerRegistry};
use crate::gate::CooldownGate;
use crate::notify::{Dispatcher, EscalationIncident, EscalationPolicy, TransportRegistry};
use crate::planner::{RecoveryPlan, RecoveryPlanner};
use crate::reporting::{FacadeMetricsBackend, MetricsBackend, ReportEmitter};
use crate::verifier::{HealthAssessor, HealthVerifier};

/// Builder for [`RecoveryOrchestrator`]
///
/// Only the catalog and the health assessor are required. Everything else
/// defaults to in-process implementations: memory cooldowns and history,
/// the `metrics` facade, no notification channels, the system clock.
pub struct OrchestratorBuilder {
    catalog: Arc<Catalog>,
    assessor: Arc<dyn HealthAssessor>,
    handlers: HandlerRegistry,
    cooldowns: Option<Arc<dyn CooldownStore>>,
    history: Option<Arc<dyn HistoryStore>>,
    metrics: Option<Arc<dyn MetricsBackend>>,
    dispatcher: Option<Dispatcher>,
    critical_policy: Option<EscalationPolicy>,
    clock: Option<Arc<dyn Clock>>,
}

impl OrchestratorBuilder {
    /// With remediation handlers
    #[must_use]
    pub fn handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    /// With cooldown store
    #[must_use]
    pub fn cooldown_store(mut self, store: Arc<dyn CooldownStore>) -> Self {
        self.cooldowns = Some(store);
        self
    }

    /// With history store
    #[must_use]
    pub fn history_store(mut self, store: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(store);
        self
    }

    /// With metrics backend
    #[must_use]
    pub fn metrics(mut self, backend: Arc<dyn MetricsBackend>) -> Self {
        self.metrics = Some(backend);
        self
    }

    /// With notification dispatcher
    #[must_use]
    pub fn dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Escalation policy whose level 0 fires for CRITICAL-class signals
    #[must_use]
    pub fn critical_policy(mut self, policy: EscalationPolicy) -> Self {
        self.critical_policy = Some(policy);
        self
    }

    /// With time source
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Assemble the orchestrator
    #[must_use]
    pub fn build(self) -> RecoveryOrchestrator {
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let cooldowns: Arc<dyn CooldownStore> = match self.cooldowns {
            Some(store) => store,
            None => Arc::new(MemoryCooldownStore::new()),
        };
        let history: Arc<dyn HistoryStore> = match self.history {
            Some(store) => store,
            None => Arc::new(MemoryHistoryStore::new()),
        };
        let metrics: Arc<dyn MetricsBackend> = match self.metrics {
            Some(backend) => backend,
            None => Arc::new(FacadeMetricsBackend::new()),
        };
        let dispatcher = self
            .dispatcher
            .unwrap_or_else(|| Dispatcher::new(Vec::new(), TransportRegistry::new()));

        RecoveryOrchestrator {
            planner: RecoveryPlanner::new(self.catalog),
            gate: CooldownGate::new(Arc::clone(&cooldowns)),
            executor: ActionExecutor::new(self.handlers, cooldowns, Arc::clone(&clock)),
            verifier: HealthVerifier::new(self.assessor, Arc::clone(&clock)),
            emitter: ReportEmitter::new(metrics, history),
            dispatcher,
            critical_policy: self.critical_policy,
            clock,
        }
    }
}

/// Runs incident recoveries end to end
pub struct RecoveryOrchestrator {
    planner: RecoveryPlanner,
    gate: CooldownGate,
    executor: ActionExecutor,
    verifier: HealthVerifier,
    emitter: ReportEmitter,
    dispatcher: Dispatcher,
    critical_policy: Option<EscalationPolicy>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RecoveryOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryOrchestrator")
            .field("planner", &self.planner)
            .field("executor", &self.executor)
            .field("dispatcher", &self.dispatcher)
            .field("critical_policy", &self.critical_policy.as_ref().map(|p| &p.name))
            .finish_non_exhaustive()
    }
}

fn advance(stage: &mut RunStage) {
    if let Some(next) = stage.next() {
        tracing::debug!(from = %stage, to = %next, "stage transition");
        *stage = next;
    }
}

impl RecoveryOrchestrator {
    /// Start building over `catalog`, verifying through `assessor`
    #[must_use]
    pub fn builder(catalog: Arc<Catalog>, assessor: Arc<dyn HealthAssessor>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            catalog,
            assessor,
            handlers: HandlerRegistry::new(),
            cooldowns: None,
            history: None,
            metrics: None,
            dispatcher: None,
            critical_policy: None,
            clock: None,
        }
    }

    /// Builder pre-filled from `config`
    ///
    /// Takes the catalog, channels, business hours, links and critical
    /// policy, and applies the configured TTL and retention to the
    /// in-memory stores.
    #[must_use]
    pub fn from_config(
        config: &RecoveryConfig,
        assessor: Arc<dyn HealthAssessor>,
        transports: TransportRegistry,
    ) -> OrchestratorBuilder {
        let mut builder = Self::builder(Arc::new(config.catalog.clone()), assessor)
            .dispatcher(Dispatcher::from_config(config, transports))
            .cooldown_store(Arc::new(MemoryCooldownStore::with_ttl(config.cooldown_ttl())))
            .history_store(Arc::new(MemoryHistoryStore::with_retention(config.history_retention())));
        if let Some(policy) = config.critical_escalation() {
            builder = builder.critical_policy(policy.clone());
        }
        builder
    }

    /// The plan a signal would produce, before cooldowns
    #[must_use]
    pub fn plan(&self, signal: &IncidentSignal) -> RecoveryPlan {
        self.planner.plan(signal)
    }

    /// Notification dispatcher, for scheduled escalation levels
    #[inline]
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Run one recovery for `signal`
    ///
    /// Returns once notification attempts have finished. Callers must treat
    /// [`RecoveryReport::is_total_failure`] as fatal and alert through
    /// their own channel.
    pub async fn run_recovery(&self, signal: &IncidentSignal) -> RecoveryReport {
        let run_id = RunId::new();
        let span = tracing::info_span!(
            "recovery_run",
            run_id = %run_id,
            trigger = %signal.trigger,
            trigger_id = %signal.id
        );
        self.run(run_id, signal).instrument(span).await
    }

    async fn run(&self, run_id: RunId, signal: &IncidentSignal) -> RecoveryReport {
        let started_at = self.clock.now();
        let mut stage = RunStage::Planning;
        tracing::info!(
            components = signal.unhealthy_components.len(),
            critical = signal.critical,
            "recovery run started"
        );

        let plan = self.planner.plan(signal);
        advance(&mut stage);

        let gated = self.gate.filter(plan, self.clock.now()).await;
        advance(&mut stage);

        let results = self.executor.execute(gated).await;
        advance(&mut stage);

        let health_after = self.verifier.verify().await;
        advance(&mut stage);

        let mut report = RecoveryReport::assemble(
            run_id,
            signal.id,
            signal.trigger,
            signal.critical,
            started_at,
            self.clock.now(),
            results,
        )
        .with_health(signal.system_health.clone(), health_after);
        self.emitter.emit(&report).await;

        let now = self.clock.now();
        let mut notifications = self.dispatcher.dispatch_report(&report, now).await;
        if signal.critical {
            match &self.critical_policy {
                Some(policy) => {
                    let incident = EscalationIncident::from_signal(signal);
                    notifications.merge(
                        self.dispatcher
                            .notify_level(policy, 0, &incident, true, now)
                            .await,
                    );
                }
                None => tracing::warn!("critical signal but no critical escalation policy configured"),
            }
        }
        report.notifications = notifications;
        advance(&mut stage);
        report.stage = stage;

        if report.is_total_failure() {
            tracing::error!(
                failed = report.failed_actions,
                notifications_attempted = report.notifications.attempted.len(),
                "recovery run delivered no remediation and no notification"
            );
        } else {
            tracing::info!(
                total = report.total_actions,
                successful = report.successful_actions,
                failed = report.failed_actions,
                skipped = report.skipped_actions,
                delivered = report.notifications.delivered_count(),
                duration_ms = report.duration_ms(),
                "recovery run finished"
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HealthError;
    use async_trait::async_trait;
    use mend_signal::{HealthAfter, SystemHealth};
    use std::collections::BTreeMap;

    struct Healthy;

    #[async_trait]
    impl HealthAssessor for Healthy {
        async fn assess_health(&self) -> Result<SystemHealth, HealthError> {
            Ok(SystemHealth::from_components(BTreeMap::new(), chrono::Utc::now()))
        }
    }

    #[tokio::test]
    async fn empty_signal_reaches_notified_with_no_actions() {
        let orchestrator = RecoveryOrchestrator::builder(Arc::new(Catalog::todo_defaults()), Arc::new(Healthy)).build();
        let signal = IncidentSignal::manual(Vec::new(), chrono::Utc::now());

        let report = orchestrator.run_recovery(&signal).await;
        assert_eq!(report.total_actions, 0);
        assert_eq!(report.success_rate(), 0.0);
        assert_eq!(report.stage, RunStage::Notified);
        assert!(matches!(report.system_health_after, HealthAfter::Assessed { .. }));
        assert!(!report.is_total_failure());
    }

    #[test]
    fn advance_walks_the_stages() {
        let mut stage = RunStage::Planning;
        for _ in 0..10 {
            advance(&mut stage);
        }
        assert_eq!(stage, RunStage::Notified);
    }
}
