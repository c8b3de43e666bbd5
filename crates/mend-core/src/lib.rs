//! Mend Core - automated incident recovery
//!
//! Given a signal that part of the system is unhealthy, the orchestrator:
//! - Plans which catalog actions to run, deduplicated and priority ordered
//! - Filters the plan through shared cooldowns
//! - Executes the remaining actions one at a time against external handlers
//! - Re-assesses health and assembles a report
//! - Publishes summary metrics, stores the report and notifies channels
//!
//! # Example
//!
//! ```rust,ignore
//! use mend_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example(assessor: Arc<dyn HealthAssessor>, handler: Arc<dyn RemediationHandler>) {
//! let orchestrator = RecoveryOrchestrator::builder(Arc::new(Catalog::todo_defaults()), assessor)
//!     .handlers(HandlerRegistry::new().with_handler(ActionKind::RestartService, handler))
//!     .build();
//!
//! let now = chrono::Utc::now();
//! let signal = IncidentSignal::manual(
//!     vec![UnhealthyComponent::new("TodoApiHealth", HealthStatus::Critical, now)],
//!     now,
//! );
//! let report = orchestrator.run_recovery(&signal).await;
//! println!("{} of {} actions succeeded", report.successful_actions, report.total_actions);
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod clock;
pub mod config;
pub mod error;
pub mod executor;
pub mod gate;
pub mod notify;
pub mod orchestrator;
pub mod planner;
pub mod reporting;
pub mod triggers;
pub mod verifier;

pub use clock::{Clock, SystemClock};
pub use config::{Catalog, Links, RecoveryConfig};
pub use error::{ConfigError, HandlerError, HealthError, MetricsError, TransportError};
pub use executor::{ActionExecutor, HandlerRegistry, RemediationHandler};
pub use gate::{CooldownGate, Gated, COOLDOWN_ACTIVE};
pub use notify::{
    BusinessHours, DispatchSummary, Dispatcher, EscalationCondition, EscalationIncident,
    EscalationLevel, EscalationPolicy, LogTransport, NotificationChannel, Notice, RenderedMessage,
    Transport, TransportKind, TransportRegistry,
};
pub use orchestrator::{OrchestratorBuilder, RecoveryOrchestrator};
pub use planner::{admits, RecoveryPlan, RecoveryPlanner, DEGRADED_MAX_PRIORITY};
pub use reporting::{FacadeMetricsBackend, MetricUnit, MetricsBackend, ReportEmitter};
pub use triggers::{evaluate_rules, CompositeRule};
pub use verifier::{HealthAssessor, HealthVerifier};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for wiring an orchestrator
    pub use crate::{
        Catalog, Clock, Dispatcher, HandlerError, HandlerRegistry, HealthAssessor, HealthError,
        MetricsBackend, NotificationChannel, RecoveryConfig, RecoveryOrchestrator,
        RemediationHandler, SystemClock, Transport, TransportKind, TransportRegistry,
    };
    pub use mend_signal::{
        ActionKind, ActionStatus, HealthStatus, IncidentSignal, RecoveryActionSpec,
        RecoveryReport, Severity, SystemHealth, UnhealthyComponent,
    };
    pub use mend_store::{CooldownStore, HistoryStore, MemoryCooldownStore, MemoryHistoryStore};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
