mod common;

use std::sync::Arc;

use backhaul_sleep::domain::clock::clock_mock::MockClock;
use backhaul_sleep::domain::config::EngineConfig;
use backhaul_sleep::domain::decision::algorithm::DecisionEngine;
use backhaul_sleep::domain::decision::decision::{Rationale, TargetState};
use backhaul_sleep::domain::forecast::forecast::{Forecast, ForecastStatus};
use backhaul_sleep::domain::forecast::ingestion::ForecastIngestion;
use backhaul_sleep::domain::topology::link::LinkState;
use backhaul_sleep::domain::topology::state_model::TopologyStateModel;
use backhaul_sleep::domain::utils::id::LinkId;
use backhaul_sleep::error::Error;
use common::{NOW, fresh_forecasts, reference_backhaul, ring4, star, topology, uniform_forecasts};

#[test]
fn test_ring_sleeps_only_the_idle_link() {
    let ring = ring4();
    let forecasts = fresh_forecasts(0, &ring, &[("AB", 80.0), ("BC", 80.0), ("CD", 80.0), ("DA", 0.0)]);

    let decision = DecisionEngine::new(0.5, 0.1).decide(&ring, &forecasts);

    assert_eq!(decision.links_with_target(TargetState::Sleeping), vec![LinkId::new("DA")]);
    assert_eq!(decision.get(&LinkId::new("DA")).unwrap().rationale, Rationale::BelowThresholdNonBridging);
    assert_eq!(decision.get(&LinkId::new("AB")).unwrap().rationale, Rationale::AboveThreshold);
    assert_eq!(decision.target_of(&LinkId::new("BC")), Some(TargetState::Active));
}

#[test]
fn test_star_leaf_never_sleeps() {
    let star = star();
    let forecasts = fresh_forecasts(0, &star, &[("XL1", 5.0), ("XL2", 0.0), ("XL3", 90.0)]);

    let decision = DecisionEngine::new(0.5, 0.1).decide(&star, &forecasts);

    assert!(decision.sleep_set().is_empty());
    assert_eq!(decision.get(&LinkId::new("XL1")).unwrap().rationale, Rationale::ConnectivityVeto);
    assert_eq!(decision.get(&LinkId::new("XL2")).unwrap().rationale, Rationale::ConnectivityVeto);
}

#[test]
fn test_forecast_failure_keeps_everything_active() {
    let backhaul = reference_backhaul();
    let ingestion = ForecastIngestion::new(7200, Arc::new(MockClock::new(NOW)));
    let forecasts = ingestion.ingest(0, Err(Error::ForecastSourceError("predictor down".to_string())), &backhaul);

    let decision = DecisionEngine::new(0.5, 0.1).decide(&backhaul, &forecasts);

    assert!(decision.sleep_set().is_empty());
    assert!(decision.decisions.values().all(|d| d.rationale == Rationale::ForecastFallback && d.forecast_status == ForecastStatus::Missing));
}

#[test]
fn test_idle_backhaul_sleeps_down_to_a_spanning_tree() {
    let backhaul = reference_backhaul();
    let forecasts = uniform_forecasts(0, &backhaul, 0.0);

    let decision = DecisionEngine::from_config(&EngineConfig::default()).decide(&backhaul, &forecasts);
    let sleep_set = decision.sleep_set();

    assert!(backhaul.is_connected_if_sleeping(&sleep_set));
    assert_eq!(sleep_set.len(), backhaul.link_count() - (backhaul.node_count() - 1));
}

#[test]
fn test_accepted_set_always_passes_the_oracle() {
    let backhaul = reference_backhaul();

    for load_percent in [0.0, 2.0, 5.0, 9.0, 20.0] {
        let loads: Vec<(String, f64)> = backhaul.links().map(|l| (l.id.to_string(), l.capacity * load_percent / 100.0)).collect();
        let loads: Vec<(&str, f64)> = loads.iter().map(|(id, load)| (id.as_str(), *load)).collect();
        let forecasts = fresh_forecasts(0, &backhaul, &loads);

        let decision = DecisionEngine::new(0.1, 0.1).decide(&backhaul, &forecasts);

        assert!(backhaul.is_connected_if_sleeping(&decision.sleep_set()), "load {}%", load_percent);
        if load_percent >= 10.0 {
            assert!(decision.sleep_set().is_empty(), "nothing below threshold at {}%", load_percent);
        }
    }
}

#[test]
fn test_ties_prefer_lower_capacity() {
    let triangle = topology(&[("a_big", "a", "b", 100.0), ("m_mid", "b", "c", 50.0), ("z_small", "c", "a", 10.0)]);
    let forecasts = uniform_forecasts(0, &triangle, 0.0);

    let decision = DecisionEngine::new(0.5, 0.1).decide(&triangle, &forecasts);

    assert_eq!(decision.links_with_target(TargetState::Sleeping), vec![LinkId::new("z_small")]);
    assert_eq!(decision.get(&LinkId::new("a_big")).unwrap().rationale, Rationale::ConnectivityVeto);
}

#[test]
fn test_margin_veto_when_alternate_path_is_too_full() {
    let pair = topology(&[("p1", "a", "b", 100.0), ("p2", "a", "b", 50.0)]);
    let forecasts = fresh_forecasts(0, &pair, &[("p1", 30.0), ("p2", 45.0)]);

    let decision = DecisionEngine::new(0.5, 0.1).decide(&pair, &forecasts);

    assert!(decision.sleep_set().is_empty());
    assert_eq!(decision.get(&LinkId::new("p1")).unwrap().rationale, Rationale::MarginVeto);
}

#[test]
fn test_margin_is_met_when_alternate_path_has_room() {
    let pair = topology(&[("p1", "a", "b", 100.0), ("p2", "a", "b", 100.0)]);
    let forecasts = fresh_forecasts(0, &pair, &[("p1", 30.0), ("p2", 40.0)]);

    let decision = DecisionEngine::new(0.5, 0.1).decide(&pair, &forecasts);

    assert_eq!(decision.links_with_target(TargetState::Sleeping), vec![LinkId::new("p1")]);
    assert_eq!(decision.get(&LinkId::new("p2")).unwrap().rationale, Rationale::ConnectivityVeto);
}

#[test]
fn test_no_eligible_links_means_all_active() {
    let ring = ring4();
    let forecasts = uniform_forecasts(3, &ring, 75.0);

    let decision = DecisionEngine::new(0.5, 0.1).decide(&ring, &forecasts);

    assert_eq!(decision.slot, 3);
    assert!(decision.sleep_set().is_empty());
    assert_eq!(decision.links_with_target(TargetState::Active).len(), 4);
}

#[test]
fn test_sleeping_link_wakes_above_threshold() {
    let (model, writer) = TopologyStateModel::new(ring4());
    writer.apply_state(&LinkId::new("DA"), LinkState::Sleeping).unwrap();
    let snapshot = model.snapshot();
    let forecasts = uniform_forecasts(1, &snapshot, 60.0);

    let decision = DecisionEngine::new(0.5, 0.1).decide(&snapshot, &forecasts);

    let da = decision.get(&LinkId::new("DA")).unwrap();
    assert_eq!(da.target, TargetState::Active);
    assert_eq!(da.rationale, Rationale::WakeAboveThreshold);
}

#[test]
fn test_transitioning_link_is_held_active() {
    let (model, writer) = TopologyStateModel::new(ring4());
    writer.apply_state(&LinkId::new("AB"), LinkState::Transitioning).unwrap();
    let snapshot = model.snapshot();
    let forecasts = uniform_forecasts(0, &snapshot, 0.0);

    let decision = DecisionEngine::new(0.5, 0.1).decide(&snapshot, &forecasts);

    assert_eq!(decision.get(&LinkId::new("AB")).unwrap().rationale, Rationale::Transitioning);
    assert_eq!(decision.sleep_set().len(), 1, "one of the other three links may sleep");
    assert!(!decision.sleep_set().contains(&LinkId::new("AB")));
}

#[test]
fn test_stale_forecast_link_stays_active() {
    let ring = ring4();
    let ingestion = ForecastIngestion::new(600, Arc::new(MockClock::new(NOW)));
    let forecasts = [("AB", NOW), ("BC", NOW), ("CD", NOW), ("DA", NOW - 601)]
        .iter()
        .map(|(link, issued_at)| Forecast { link_id: LinkId::new(*link), slot: 0, predicted_utilization: 0.0, issued_at: *issued_at })
        .collect();
    let set = ingestion.ingest(0, Ok(forecasts), &ring);

    let decision = DecisionEngine::new(0.5, 0.1).decide(&ring, &set);

    let da = decision.get(&LinkId::new("DA")).unwrap();
    assert_eq!(da.rationale, Rationale::ForecastFallback);
    assert_eq!(da.forecast_status, ForecastStatus::Stale);
    assert_eq!(da.predicted_utilization, 100.0);
    assert!(decision.sleep_set().is_empty(), "every alternate path crosses DA, which has no spare capacity");
}
