mod common;

use backhaul_sleep::domain::decision::decision::TargetState;
use backhaul_sleep::domain::plan::sleep_plan::SleepPlan;
use backhaul_sleep::domain::utils::id::LinkId;
use backhaul_sleep::error::Error;
use common::{decision, ring4, temp_path};

#[test]
fn test_plan_round_trips_through_json() {
    let ring = ring4();
    let mut plan = SleepPlan::new(4);
    let mut first = decision(0, &ring, &["DA"]);
    first.decisions.get_mut(&LinkId::new("DA")).unwrap().predicted_utilization = 0.9181470330482903;
    first.decisions.get_mut(&LinkId::new("AB")).unwrap().predicted_utilization = 0.1 + 0.2;
    plan.push_slot(first).unwrap();
    plan.push_slot(decision(1, &ring, &[])).unwrap();
    plan.mark_confirmed(0);
    let path = temp_path("plan.json");

    plan.save(&path).unwrap();
    let loaded = SleepPlan::load(&path).unwrap();

    assert_eq!(loaded, plan);
    assert!(loaded.slot(0).unwrap().confirmed);
    assert!(!loaded.slot(1).unwrap().confirmed);
    let da = loaded.slot(0).unwrap().decision.get(&LinkId::new("DA")).unwrap();
    assert_eq!(da.target, TargetState::Sleeping);
    assert_eq!(da.predicted_utilization.to_bits(), 0.9181470330482903f64.to_bits(), "utilization must survive the round trip bit for bit");
    let _ = std::fs::remove_file(path);
}

#[test]
fn test_saved_plan_uses_camel_case_keys() {
    let mut plan = SleepPlan::new(1);
    plan.push_slot(decision(0, &ring4(), &[])).unwrap();
    let path = temp_path("plan_keys.json");

    plan.save(&path).unwrap();
    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();

    assert!(json.get("runId").is_some());
    assert!(json.get("createdAt").is_some());
    assert_eq!(json["horizon"], 1);
    let _ = std::fs::remove_file(path);
}

#[test]
fn test_plan_rejects_slots_beyond_horizon() {
    let ring = ring4();
    let mut plan = SleepPlan::new(2);
    plan.push_slot(decision(0, &ring, &[])).unwrap();
    plan.push_slot(decision(1, &ring, &[])).unwrap();

    assert!(plan.is_complete());
    assert!(matches!(plan.push_slot(decision(2, &ring, &[])), Err(Error::ConfigError(_))));
    assert_eq!(plan.len(), 2);
}

#[test]
fn test_plan_rejects_out_of_order_slots() {
    let ring = ring4();
    let mut plan = SleepPlan::new(5);
    plan.push_slot(decision(3, &ring, &[])).unwrap();

    assert!(matches!(plan.push_slot(decision(3, &ring, &[])), Err(Error::ConfigError(_))));
    assert!(matches!(plan.push_slot(decision(1, &ring, &[])), Err(Error::ConfigError(_))));
    assert!(plan.push_slot(decision(7, &ring, &[])).is_ok(), "gaps are allowed");
}

#[test]
fn test_confirming_unknown_slot_is_a_no_op() {
    let mut plan = SleepPlan::new(3);
    plan.push_slot(decision(0, &ring4(), &[])).unwrap();

    assert!(!plan.mark_confirmed(5));
    assert!(plan.mark_confirmed(0));
    assert!(plan.slots().iter().all(|s| s.confirmed));
}

#[test]
fn test_loading_missing_plan_fails() {
    assert!(SleepPlan::load(temp_path("missing_plan.json")).is_err());
}
