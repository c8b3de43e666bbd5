//! Recovery planning
//!
//! Maps the unhealthy components of a signal to an ordered, deduplicated
//! list of catalog actions. Planning is a pure function of the signal and
//! the catalog: no I/O, no clock, no cooldowns (see [`crate::gate`]).

use indexmap::map::Entry;
use indexmap::IndexMap;
use mend_signal::{ActionKind, HealthStatus, IncidentSignal, RecoveryActionSpec};
use serde::{Deserialize, Serialize};

use crate::config::Catalog;
use std::sync::Arc;

/// Highest priority value a degraded component may run
pub const DEGRADED_MAX_PRIORITY: u8 = 2;

/// Ordered list of candidate actions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryPlan {
    actions: Vec<RecoveryActionSpec>,
}

impl RecoveryPlan {
    /// Plan from already ordered actions
    #[inline]
    #[must_use]
    pub fn from_actions(actions: Vec<RecoveryActionSpec>) -> Self {
        Self { actions }
    }

    /// Actions in execution order
    #[inline]
    #[must_use]
    pub fn actions(&self) -> &[RecoveryActionSpec] {
        &self.actions
    }

    /// Consume into actions
    #[inline]
    #[must_use]
    pub fn into_actions(self) -> Vec<RecoveryActionSpec> {
        self.actions
    }

    /// Number of actions
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether there is nothing to do
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Whether a component in `status` may run `action`
///
/// Critical admits everything, degraded only the two most conservative
/// tiers, healthy nothing.
#[inline]
#[must_use]
pub fn admits(status: HealthStatus, action: &RecoveryActionSpec) -> bool {
    match status {
        HealthStatus::Critical => true,
        HealthStatus::Degraded => action.priority <= DEGRADED_MAX_PRIORITY,
        HealthStatus::Healthy => false,
    }
}

/// Why a catalog entry cannot be planned
#[must_use]
pub fn malformed_reason(action: &RecoveryActionSpec) -> Option<&'static str> {
    if action.target.trim().is_empty() {
        return Some("empty target");
    }
    if action.priority == 0 {
        return Some("priority must be at least 1");
    }
    if matches!(&action.kind, ActionKind::Custom(name) if name.trim().is_empty()) {
        return Some("custom action without a name");
    }
    None
}

/// Builds recovery plans from an immutable catalog
#[derive(Debug, Clone)]
pub struct RecoveryPlanner {
    catalog: Arc<Catalog>,
}

impl RecoveryPlanner {
    /// Create planner over `catalog`
    #[inline]
    #[must_use]
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    /// Catalog in use
    #[inline]
    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Admitted catalog actions for one component
    ///
    /// Unknown components and components with a malformed entry yield an
    /// empty list; the rest of the plan is unaffected.
    #[must_use]
    pub fn eligible_for(&self, component: &str, status: HealthStatus) -> Vec<RecoveryActionSpec> {
        let Some(actions) = self.catalog.actions_for(component) else {
            tracing::debug!(component, "no catalog entry for component");
            return Vec::new();
        };

        if let Some((action, reason)) = actions
            .iter()
            .find_map(|a| malformed_reason(a).map(|reason| (a, reason)))
        {
            tracing::warn!(
                component,
                action = %action.kind,
                target = %action.target,
                reason,
                "malformed catalog entry; component skipped"
            );
            return Vec::new();
        }

        actions
            .iter()
            .filter(|action| admits(status, action))
            .cloned()
            .collect()
    }

    /// Build the plan for `signal`
    ///
    /// Admitted actions are concatenated in component order, deduplicated
    /// by `(kind, target)` and stably sorted by ascending priority. When a
    /// duplicate carries a lower priority value it replaces the earlier
    /// entry; otherwise the first occurrence wins.
    #[must_use]
    pub fn plan(&self, signal: &IncidentSignal) -> RecoveryPlan {
        let mut unique: IndexMap<(ActionKind, String), RecoveryActionSpec> = IndexMap::new();

        for component in &signal.unhealthy_components {
            for action in self.eligible_for(&component.name, component.status()) {
                let (kind, target) = action.identity();
                match unique.entry((kind.clone(), target.to_owned())) {
                    Entry::Occupied(mut existing) => {
                        if action.priority < existing.get().priority {
                            existing.insert(action);
                        }
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(action);
                    }
                }
            }
        }

        let mut actions: Vec<RecoveryActionSpec> = unique.into_values().collect();
        actions.sort_by_key(|action| action.priority);

        tracing::debug!(
            trigger_id = %signal.id,
            components = signal.unhealthy_components.len(),
            actions = actions.len(),
            "recovery plan built"
        );
        RecoveryPlan::from_actions(actions)
    }
}
