use std::collections::HashSet;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::domain::forecast::forecast::ForecastSet;
use crate::domain::topology::link::{Link, LinkState};
use crate::domain::topology::network_topology::NetworkTopology;
use crate::domain::utils::id::{LinkId, NodeId};
use crate::error::Result;

/// Immutable view of the topology at one instant. Cheap to take (one `Arc` clone); a later write copies the
/// topology instead of mutating what a reader holds.
pub type TopologySnapshot = Arc<NetworkTopology>;

type SharedTopology = Arc<RwLock<Arc<NetworkTopology>>>;

fn read(inner: &SharedTopology) -> RwLockReadGuard<'_, Arc<NetworkTopology>> {
    inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write(inner: &SharedTopology) -> RwLockWriteGuard<'_, Arc<NetworkTopology>> {
    inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Read side of the topology state model. Clone it freely; every reader works on snapshots.
#[derive(Debug, Clone)]
pub struct TopologyStateModel {
    inner: SharedTopology,
}

/// The only handle that can mutate the topology. It is deliberately not `Clone`: the control loop owns it and
/// lends it to the command dispatcher, which gives the link-state map a single writer.
#[derive(Debug)]
pub struct TopologyWriter {
    inner: SharedTopology,
}

impl TopologyStateModel {
    pub fn new(topology: NetworkTopology) -> (TopologyStateModel, TopologyWriter) {
        let inner: SharedTopology = Arc::new(RwLock::new(Arc::new(topology)));
        (TopologyStateModel { inner: inner.clone() }, TopologyWriter { inner })
    }

    pub fn load_topology(nodes: Vec<NodeId>, links: Vec<Link>) -> Result<(TopologyStateModel, TopologyWriter)> {
        Ok(Self::new(NetworkTopology::load_topology(nodes, links)?))
    }

    pub fn snapshot(&self) -> TopologySnapshot {
        read(&self.inner).clone()
    }

    pub fn is_connected_if_sleeping(&self, candidates: &HashSet<LinkId>) -> bool {
        self.snapshot().is_connected_if_sleeping(candidates)
    }
}

impl TopologyWriter {
    pub fn snapshot(&self) -> TopologySnapshot {
        read(&self.inner).clone()
    }

    pub fn reader(&self) -> TopologyStateModel {
        TopologyStateModel { inner: self.inner.clone() }
    }

    /// Returns the previous state of the link.
    pub fn apply_state(&self, link_id: &LinkId, new_state: LinkState) -> Result<LinkState> {
        let mut guard = write(&self.inner);
        let previous = Arc::make_mut(&mut guard).apply_state(link_id, new_state)?;

        if previous != new_state {
            log::debug!("Link {} state {} -> {}", link_id, previous, new_state);
        }

        Ok(previous)
    }

    pub fn record_confirmed_utilization(&self, link_id: &LinkId, value: f64) -> Result<()> {
        let mut guard = write(&self.inner);
        Arc::make_mut(&mut guard).set_confirmed_utilization(link_id, value)
    }

    /// Copies the slot's predicted (or fail-safe) utilization into each link's prediction field.
    pub fn record_predictions(&self, forecasts: &ForecastSet) -> Result<()> {
        let mut guard = write(&self.inner);
        let topology = Arc::make_mut(&mut guard);

        for (link_id, entry) in forecasts.entries() {
            topology.set_predicted_utilization(link_id, entry.effective_utilization())?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_is_not_affected_by_later_writes() {
        let nodes = vec![NodeId::new("a"), NodeId::new("b"), NodeId::new("c")];
        let links = vec![
            Link::new(LinkId::new("ab"), NodeId::new("a"), NodeId::new("b"), 10.0),
            Link::new(LinkId::new("bc"), NodeId::new("b"), NodeId::new("c"), 10.0),
            Link::new(LinkId::new("ca"), NodeId::new("c"), NodeId::new("a"), 10.0),
        ];
        let (model, writer) = TopologyStateModel::load_topology(nodes, links).unwrap();

        let before = model.snapshot();
        writer.apply_state(&LinkId::new("ab"), LinkState::Sleeping).unwrap();
        let after = model.snapshot();

        assert_eq!(before.link(&LinkId::new("ab")).unwrap().state, LinkState::Active, "Old snapshot must keep the old state");
        assert_eq!(after.link(&LinkId::new("ab")).unwrap().state, LinkState::Sleeping);
    }
}
