#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use backhaul_sleep::domain::clock::clock_mock::MockClock;
use backhaul_sleep::domain::config::DispatchConfig;
use backhaul_sleep::domain::decision::decision::{LinkDecision, Rationale, SlotDecision, TargetState};
use backhaul_sleep::domain::forecast::forecast::{Forecast, ForecastSet, ForecastStatus};
use backhaul_sleep::domain::forecast::ingestion::ForecastIngestion;
use backhaul_sleep::domain::topology::link::Link;
use backhaul_sleep::domain::topology::network_topology::NetworkTopology;
use backhaul_sleep::domain::utils::id::{LinkId, NodeId};
use backhaul_sleep::loader::parser::load_topology_file;

pub const NOW: i64 = 1_700_000_000;

/// Builds a topology from `(link, source, target, capacity)` tuples. Nodes are taken from the link endpoints.
pub fn topology(links: &[(&str, &str, &str, f64)]) -> NetworkTopology {
    let mut nodes: Vec<NodeId> = Vec::new();
    for (_, source, target, _) in links {
        for node in [source, target] {
            let id = NodeId::new(*node);
            if !nodes.contains(&id) {
                nodes.push(id);
            }
        }
    }

    let links = links.iter().map(|(id, s, t, c)| Link::new(LinkId::new(*id), NodeId::new(*s), NodeId::new(*t), *c)).collect();
    NetworkTopology::load_topology(nodes, links).unwrap()
}

/// `A-B-C-D-A`, every link rated 100.
pub fn ring4() -> NetworkTopology {
    topology(&[("AB", "A", "B", 100.0), ("BC", "B", "C", 100.0), ("CD", "C", "D", 100.0), ("DA", "D", "A", 100.0)])
}

/// Hub `X` with three leaves.
pub fn star() -> NetworkTopology {
    topology(&[("XL1", "X", "L1", 100.0), ("XL2", "X", "L2", 100.0), ("XL3", "X", "L3", 100.0)])
}

pub fn reference_backhaul() -> NetworkTopology {
    load_topology_file(data_path("backhaul_topology.json")).unwrap()
}

pub fn data_path(file: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("data").join(file)
}

/// Fresh forecasts for `slot`, run through ingestion so statuses are set the way the control loop sets them.
pub fn fresh_forecasts(slot: u64, topology: &NetworkTopology, loads: &[(&str, f64)]) -> ForecastSet {
    let forecasts = loads
        .iter()
        .map(|(link, load)| Forecast { link_id: LinkId::new(*link), slot, predicted_utilization: *load, issued_at: NOW })
        .collect();

    ForecastIngestion::new(7200, Arc::new(MockClock::new(NOW))).ingest(slot, Ok(forecasts), topology)
}

/// Every link of `topology` predicted at `load`.
pub fn uniform_forecasts(slot: u64, topology: &NetworkTopology, load: f64) -> ForecastSet {
    let ids: Vec<String> = topology.link_ids().map(|id| id.to_string()).collect();
    let loads: Vec<(&str, f64)> = ids.iter().map(|id| (id.as_str(), load)).collect();
    fresh_forecasts(slot, topology, &loads)
}

/// A hand-written decision: links in `asleep` sleep, every other link of `topology` stays active.
pub fn decision(slot: u64, topology: &NetworkTopology, asleep: &[&str]) -> SlotDecision {
    let decisions = topology
        .link_ids()
        .map(|id| {
            let sleeping = asleep.contains(&id.as_str());
            let link_decision = LinkDecision {
                target: if sleeping { TargetState::Sleeping } else { TargetState::Active },
                rationale: if sleeping { Rationale::BelowThresholdNonBridging } else { Rationale::AboveThreshold },
                predicted_utilization: 0.0,
                forecast_status: ForecastStatus::Fresh,
            };
            (id.clone(), link_decision)
        })
        .collect();

    SlotDecision { slot, decisions }
}

pub fn fast_dispatch_config() -> DispatchConfig {
    DispatchConfig {
        action_timeout: Duration::from_millis(50),
        confirm_timeout: Duration::from_millis(60),
        confirm_poll: Duration::from_millis(5),
        max_retries: 2,
        backoff_base: Duration::from_millis(1),
    }
}

pub fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("backhaul_sleep_{}_{}", uuid::Uuid::new_v4(), name))
}
