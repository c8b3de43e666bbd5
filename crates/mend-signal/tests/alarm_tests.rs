use mend_signal::{AlarmExpr, AlarmState, SignalError, MAX_NESTING};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::collections::HashMap;

const NAMES: [&str; 4] = ["TodoApiErrors", "TodoApiLatency", "TableThrottles", "CdnErrors"];

fn arb_expr() -> impl Strategy<Value = AlarmExpr> {
    let leaf = prop::sample::select(NAMES.to_vec()).prop_map(|name| AlarmExpr::atom(name));
    leaf.prop_recursive(4, 16, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(a, b)| a.and(b)),
            (inner.clone(), inner).prop_map(|(a, b)| a.or(b)),
        ]
    })
}

fn arb_states() -> impl Strategy<Value = HashMap<String, AlarmState>> {
    prop::collection::vec(
        prop_oneof![
            Just(AlarmState::Ok),
            Just(AlarmState::Alarm),
            Just(AlarmState::InsufficientData),
        ],
        NAMES.len(),
    )
    .prop_map(|states| {
        NAMES
            .iter()
            .zip(states)
            .map(|(name, state)| ((*name).to_string(), state))
            .collect()
    })
}

#[test]
fn test_source_style_two_operand_rule() {
    let expr: AlarmExpr = "ALARM(\"TodoApiErrors\") OR ALARM(\"CdnErrors\")".parse().unwrap();
    let mut states = HashMap::new();
    states.insert("CdnErrors".to_string(), AlarmState::Alarm);
    assert!(expr.evaluate(&states));
}

#[test]
fn test_nested_rule_parses_into_expected_tree() {
    let expr: AlarmExpr = r#"ALARM("TodoApiErrors") AND (ALARM("TodoApiLatency") OR ALARM("TableThrottles"))"#
        .parse()
        .unwrap();
    assert_eq!(
        expr,
        AlarmExpr::atom("TodoApiErrors")
            .and(AlarmExpr::atom("TodoApiLatency").or(AlarmExpr::atom("TableThrottles")))
    );
    assert_eq!(expr.alarm_names(), vec!["TodoApiErrors", "TodoApiLatency", "TableThrottles"]);
}

#[test]
fn test_runaway_nesting_reports_offset() {
    let depth = MAX_NESTING + 1;
    let text = format!("{}ALARM(a){}", "(".repeat(depth), ")".repeat(depth));
    match text.parse::<AlarmExpr>() {
        Err(SignalError::InvalidExpression { offset, .. }) => assert_eq!(offset, MAX_NESTING),
        other => panic!("expected nesting error, got {other:?}"),
    }
}

proptest! {
    #[test]
    fn prop_display_parse_round_trip(expr in arb_expr()) {
        let text = expr.to_string();
        let parsed: AlarmExpr = text.parse().unwrap();
        prop_assert_eq!(parsed, expr);
    }

    #[test]
    fn prop_all_ok_never_fires(expr in arb_expr()) {
        let states: HashMap<String, AlarmState> = NAMES
            .iter()
            .map(|name| ((*name).to_string(), AlarmState::Ok))
            .collect();
        prop_assert!(!expr.evaluate(&states));
    }

    #[test]
    fn prop_and_implies_or(a in arb_expr(), b in arb_expr(), states in arb_states()) {
        let both = a.clone().and(b.clone()).evaluate(&states);
        let either = a.or(b).evaluate(&states);
        prop_assert!(!both || either);
    }
}
