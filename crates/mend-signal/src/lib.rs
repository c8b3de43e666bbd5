//! Mend Signal - incident and recovery data model
//!
//! The leaf crate of the workspace. It defines what every other crate
//! exchanges:
//! - Incident signals and the health snapshots they carry
//! - Catalog action specs and per-action results
//! - Recovery reports and the run stage machine
//! - Composite alarm expressions
//!
//! # Example
//!
//! ```rust
//! use mend_signal::{HealthStatus, IncidentSignal, UnhealthyComponent};
//!
//! let now = chrono::Utc::now();
//! let signal = IncidentSignal::manual(
//!     vec![UnhealthyComponent::new("TodoApiHealth", HealthStatus::Critical, now)],
//!     now,
//! );
//! assert!(signal.has_unhealthy());
//! ```

#![warn(unreachable_pub)]

pub mod action;
pub mod alarm;
pub mod error;
pub mod health;
pub mod report;
pub mod severity;
pub mod signal;

pub use action::{ActionKind, ActionStatus, CooldownKey, RecoveryActionSpec, RecoveryResult};
pub use alarm::{AlarmExpr, AlarmState, MAX_NESTING, MAX_OPERANDS};
pub use error::SignalError;
pub use health::{ComponentHealth, HealthStatus, SystemHealth};
pub use report::{
    HealthAfter, HealthComparison, NotificationOutcome, RecoveryReport, RunId, RunStage,
};
pub use severity::Severity;
pub use signal::{AlarmMetadata, IncidentSignal, TriggerId, TriggerKind, UnhealthyComponent};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
