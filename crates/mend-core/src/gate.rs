//! Cooldown filter stage
//!
//! Walks the plan in order and claims each action's cooldown slot. Claimed
//! actions go on to execution; actions still cooling down become `skipped`
//! results in their plan position. A store error fails open.

use chrono::{DateTime, Utc};
use mend_signal::{RecoveryActionSpec, RecoveryResult};
use mend_store::{Claim, CooldownStore};
use serde_json::{json, Map};
use std::sync::Arc;

use crate::planner::RecoveryPlan;

/// Skip reason recorded for cooled-down actions
pub const COOLDOWN_ACTIVE: &str = "cooldown active";

/// Plan position after filtering
#[derive(Debug, Clone, PartialEq)]
pub enum Gated {
    /// Run this action
    Run(RecoveryActionSpec),
    /// Already resolved as skipped
    Skipped(RecoveryResult),
}

impl Gated {
    /// Whether the action proceeds to execution
    #[inline]
    #[must_use]
    pub fn is_run(&self) -> bool {
        matches!(self, Gated::Run(_))
    }
}

/// Cooldown filter over a shared store
#[derive(Clone)]
pub struct CooldownGate {
    store: Arc<dyn CooldownStore>,
}

impl std::fmt::Debug for CooldownGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CooldownGate").finish_non_exhaustive()
    }
}

impl CooldownGate {
    /// Gate over `store`
    #[inline]
    #[must_use]
    pub fn new(store: Arc<dyn CooldownStore>) -> Self {
        Self { store }
    }

    /// Underlying store
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<dyn CooldownStore> {
        &self.store
    }

    /// Decide one action
    pub async fn check(&self, action: RecoveryActionSpec, now: DateTime<Utc>) -> Gated {
        let key = action.cooldown_key();
        match self.store.try_claim(&key, action.cooldown(), now).await {
            Ok(Claim::Claimed) => Gated::Run(action),
            Ok(Claim::Active { last, remaining }) => {
                let remaining_secs = remaining.num_seconds().max(0);
                tracing::warn!(
                    key = %key,
                    action = %action.kind,
                    target = %action.target,
                    last_execution = %last,
                    remaining_secs,
                    "skipping action: {COOLDOWN_ACTIVE}"
                );
                let mut extra = Map::new();
                extra.insert("remaining_secs".to_string(), json!(remaining_secs));
                extra.insert("last_execution".to_string(), json!(last));
                Gated::Skipped(RecoveryResult::skipped(action, COOLDOWN_ACTIVE, extra, now))
            }
            Err(error) => {
                tracing::warn!(
                    key = %key,
                    action = %action.kind,
                    target = %action.target,
                    %error,
                    "cooldown store unavailable; treating action as eligible (degraded mode)"
                );
                Gated::Run(action)
            }
        }
    }

    /// Filter a whole plan, preserving order
    pub async fn filter(&self, plan: RecoveryPlan, now: DateTime<Utc>) -> Vec<Gated> {
        let mut gated = Vec::with_capacity(plan.len());
        for action in plan.into_actions() {
            gated.push(self.check(action, now).await);
        }
        gated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use mend_signal::{ActionKind, ActionStatus};
    use mend_store::MemoryCooldownStore;

    fn at(mins: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap() + Duration::minutes(mins)
    }

    fn plan() -> RecoveryPlan {
        RecoveryPlan::from_actions(vec![
            RecoveryActionSpec::new(ActionKind::RestartService, "lambda-functions", 1, 10),
            RecoveryActionSpec::new(ActionKind::ClearCache, "api-gateway", 2, 0),
        ])
    }

    #[tokio::test]
    async fn second_pass_skips_cooled_down_actions() {
        let gate = CooldownGate::new(Arc::new(MemoryCooldownStore::new()));

        let first = gate.filter(plan(), at(0)).await;
        assert!(first.iter().all(Gated::is_run));

        let second = gate.filter(plan(), at(1)).await;
        match &second[0] {
            Gated::Skipped(result) => {
                assert_eq!(result.status, ActionStatus::Skipped);
                assert_eq!(result.skip_reason(), Some(COOLDOWN_ACTIVE));
                assert_eq!(result.details["remaining_secs"], json!(540));
            }
            Gated::Run(_) => panic!("expected skip"),
        }
        // Zero cooldown never blocks
        assert!(second[1].is_run());
    }
}
