mod common;

use std::sync::Arc;

use backhaul_sleep::domain::clock::clock_mock::MockClock;
use backhaul_sleep::domain::dispatch::dispatcher::CommandDispatcher;
use backhaul_sleep::domain::dispatch::emulated_control_plane::EmulatedControlPlane;
use backhaul_sleep::domain::metrics::aggregator::{MetricsAggregator, ObservedPerformance};
use backhaul_sleep::domain::metrics::metrics_log::{EnergyMetricsRecord, MetricsLog};
use backhaul_sleep::domain::metrics::power_model::PowerModel;
use backhaul_sleep::domain::topology::link::LinkState;
use backhaul_sleep::domain::topology::state_model::TopologyStateModel;
use backhaul_sleep::domain::utils::id::LinkId;
use common::{NOW, decision, fast_dispatch_config, reference_backhaul, ring4, temp_path};
use tokio_util::sync::CancellationToken;

fn record(slot: u64, throughput: Option<f64>) -> EnergyMetricsRecord {
    EnergyMetricsRecord {
        slot,
        timestamp: "2023-11-14T22:13:20+00:00".to_string(),
        active_links: 3,
        sleeping_links: 1,
        estimated_power_w: 310.0,
        observed_throughput_mbps: throughput,
        observed_latency_ms: None,
        dispatched_actions: 1,
        confirmed_actions: 1,
        rolled_back_actions: 0,
        state_transitions: 2,
        connectivity_ok: true,
    }
}

#[test]
fn test_power_never_drops_when_a_link_wakes() {
    let power = PowerModel::new(100.0, 10.0);
    let total = 39;

    for sleeping in 1..=total {
        let fewer_active = power.estimate(total - sleeping, sleeping);
        let more_active = power.estimate(total - sleeping + 1, sleeping - 1);
        assert!(more_active >= fewer_active, "{} sleeping", sleeping);
    }
    assert_eq!(power.estimate(total, 0), 3900.0);
}

#[test]
fn test_transitioning_links_draw_active_power() {
    let (model, writer) = TopologyStateModel::new(ring4());
    writer.apply_state(&LinkId::new("AB"), LinkState::Transitioning).unwrap();
    writer.apply_state(&LinkId::new("CD"), LinkState::Sleeping).unwrap();
    let power = PowerModel::new(100.0, 10.0);

    assert_eq!(PowerModel::link_counts(&model.snapshot()), (3, 1));
    assert_eq!(power.estimate_topology(&model.snapshot()), 310.0);
    assert_eq!(power.savings(&model.snapshot()), 90.0);
}

#[test]
fn test_metrics_log_writes_semicolon_separated_rows() {
    let path = temp_path("metrics.csv");
    let mut log = MetricsLog::init(Some(path.clone())).unwrap();

    log.append(record(0, None));
    log.append(record(1, Some(42.5)));
    log.shutdown();

    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.lines().next().unwrap().starts_with("slot;timestamp;active_links"));

    let mut reader = csv::ReaderBuilder::new().delimiter(b';').from_path(&path).unwrap();
    let rows: Vec<EnergyMetricsRecord> = reader.deserialize().collect::<Result<_, _>>().unwrap();
    assert_eq!(rows, vec![record(0, None), record(1, Some(42.5))]);
    let _ = std::fs::remove_file(path);
}

#[tokio::test]
async fn test_aggregator_records_confirmed_state() {
    let (model, writer) = TopologyStateModel::new(ring4());
    let plane = EmulatedControlPlane::from_topology(&model.snapshot());
    let dispatcher = CommandDispatcher::new(Arc::new(plane), fast_dispatch_config());
    let report = dispatcher.dispatch(&writer, &decision(0, &model.snapshot(), &["DA"]), &CancellationToken::new()).await.unwrap();
    let mut aggregator = MetricsAggregator::new(PowerModel::new(100.0, 10.0), 3600, Arc::new(MockClock::new(NOW)), None);

    let observed = ObservedPerformance { throughput_mbps: Some(18.0), latency_ms: Some(2.5) };
    let row = aggregator.record(0, &model.snapshot(), &report, Some(observed)).clone();

    assert_eq!(row.active_links, 3);
    assert_eq!(row.sleeping_links, 1);
    assert_eq!(row.estimated_power_w, 310.0);
    assert_eq!(row.dispatched_actions, 1);
    assert_eq!(row.confirmed_actions, 1);
    assert_eq!(row.rolled_back_actions, 0);
    assert_eq!(row.state_transitions, 2);
    assert_eq!(row.observed_throughput_mbps, Some(18.0));
    assert_eq!(row.observed_latency_ms, Some(2.5));
    assert!(row.connectivity_ok);
    assert!(row.timestamp.starts_with("2023-11-14T22:13:20"));

    let totals = aggregator.totals();
    assert_eq!(totals.slots, 1);
    assert_eq!(totals.energy_wh, 310.0);
    assert_eq!(totals.baseline_energy_wh, 400.0);
    assert!((totals.savings_ratio() - 0.225).abs() < 1e-9);
}

#[tokio::test]
async fn test_rollbacks_show_up_in_totals() {
    let (model, writer) = TopologyStateModel::new(reference_backhaul());
    let plane = EmulatedControlPlane::from_topology(&model.snapshot());
    plane.reject_link(&LinkId::new("link_25"));
    let dispatcher = CommandDispatcher::new(Arc::new(plane), fast_dispatch_config());
    let mut aggregator = MetricsAggregator::new(PowerModel::new(100.0, 10.0), 1800, Arc::new(MockClock::new(NOW)), None);

    let report = dispatcher.dispatch(&writer, &decision(0, &model.snapshot(), &["link_25", "link_1"]), &CancellationToken::new()).await.unwrap();
    aggregator.record(0, &model.snapshot(), &report, None);

    let totals = aggregator.totals();
    assert_eq!(totals.dispatched_actions, 2);
    assert_eq!(totals.rolled_back_actions, 1);
    assert_eq!(totals.connectivity_violations, 0);
    assert_eq!(totals.energy_wh, (38.0 * 100.0 + 10.0) / 2.0, "half-hour slot");
    assert_eq!(aggregator.records()[0].observed_throughput_mbps, None);
}
