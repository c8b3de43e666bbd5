//! Property tests for recovery planning

use mend_core::planner::admits;
use mend_core::{Catalog, RecoveryPlanner};
use mend_signal::{ActionKind, HealthStatus, IncidentSignal, RecoveryActionSpec, UnhealthyComponent};
use proptest::prelude::*;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

const COMPONENTS: [&str; 4] = ["TodoApiHealth", "DatabaseHealth", "CacheHealth", "CdnHealth"];

fn kind_strategy() -> impl Strategy<Value = ActionKind> {
    prop_oneof![
        Just(ActionKind::RestartService),
        Just(ActionKind::ScaleUp),
        Just(ActionKind::ClearCache),
        Just(ActionKind::Failover),
    ]
}

fn action_strategy() -> impl Strategy<Value = RecoveryActionSpec> {
    (
        kind_strategy(),
        prop::sample::select(vec!["lambda-functions", "api-gateway", "dynamodb-tables"]),
        1u8..=5,
        0u32..60,
    )
        .prop_map(|(kind, target, priority, cooldown)| RecoveryActionSpec::new(kind, target, priority, cooldown))
}

fn catalog_strategy() -> impl Strategy<Value = Catalog> {
    prop::collection::vec(prop::collection::vec(action_strategy(), 0..5), COMPONENTS.len()).prop_map(|lists| {
        let entries: BTreeMap<String, Vec<RecoveryActionSpec>> = COMPONENTS
            .iter()
            .map(|name| (*name).to_string())
            .zip(lists)
            .collect();
        Catalog::new(entries)
    })
}

fn status_strategy() -> impl Strategy<Value = HealthStatus> {
    prop_oneof![
        Just(HealthStatus::Healthy),
        Just(HealthStatus::Degraded),
        Just(HealthStatus::Critical),
    ]
}

fn signal_strategy() -> impl Strategy<Value = IncidentSignal> {
    prop::collection::vec(
        (prop::sample::select(COMPONENTS.to_vec()), status_strategy()),
        0..6,
    )
    .prop_map(|pairs| {
        let now = chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let components = pairs
            .into_iter()
            .map(|(name, status)| UnhealthyComponent::new(name, status, now))
            .collect();
        IncidentSignal::manual(components, now)
    })
}

/// Every admitted `(kind, target)` with its lowest admitted priority
fn admitted(catalog: &Catalog, signal: &IncidentSignal) -> HashMap<(ActionKind, String), u8> {
    let mut best: HashMap<(ActionKind, String), u8> = HashMap::new();
    for component in &signal.unhealthy_components {
        for action in catalog.actions_for(&component.name).unwrap_or_default() {
            if admits(component.status(), action) {
                let entry = best
                    .entry((action.kind.clone(), action.target.clone()))
                    .or_insert(action.priority);
                *entry = (*entry).min(action.priority);
            }
        }
    }
    best
}

proptest! {
    #[test]
    fn plan_is_sorted_and_unique(catalog in catalog_strategy(), signal in signal_strategy()) {
        let plan = RecoveryPlanner::new(Arc::new(catalog)).plan(&signal);

        let priorities: Vec<u8> = plan.actions().iter().map(|a| a.priority).collect();
        prop_assert!(priorities.windows(2).all(|w| w[0] <= w[1]));

        let mut seen = HashSet::new();
        for action in plan.actions() {
            prop_assert!(seen.insert((action.kind.clone(), action.target.clone())));
        }
    }

    #[test]
    fn plan_matches_eligibility(catalog in catalog_strategy(), signal in signal_strategy()) {
        let expected = admitted(&catalog, &signal);
        let plan = RecoveryPlanner::new(Arc::new(catalog)).plan(&signal);

        prop_assert_eq!(plan.len(), expected.len());
        for action in plan.actions() {
            let best = expected.get(&(action.kind.clone(), action.target.clone()));
            prop_assert_eq!(best, Some(&action.priority));
        }
    }

    #[test]
    fn healthy_signals_plan_nothing(catalog in catalog_strategy()) {
        let now = chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let components = COMPONENTS
            .iter()
            .map(|name| UnhealthyComponent::new(*name, HealthStatus::Healthy, now))
            .collect();
        let signal = IncidentSignal::manual(components, now);
        prop_assert!(RecoveryPlanner::new(Arc::new(catalog)).plan(&signal).is_empty());
    }
}
