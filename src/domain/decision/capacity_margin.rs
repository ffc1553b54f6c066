use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::domain::topology::network_topology::NetworkTopology;
use crate::domain::utils::id::{LinkId, NodeId};

const EPSILON: f64 = 1e-9;

/// A link accepted by the connectivity pass, waiting for the margin check.
#[derive(Debug, Clone)]
pub struct SleepCandidate {
    pub link_id: LinkId,
    pub predicted_utilization: f64,
    pub capacity: f64,
}

/// Second veto after connectivity: the traffic a sleeping link would have carried must fit on the best
/// remaining path between its endpoints, with `margin * capacity` of headroom on top.
///
/// Candidates are checked in the order given. Each accepted candidate reserves its demand along the path it
/// was routed on, so later candidates see the reduced residual capacity. Residual capacity of a link is
/// `capacity - predicted load - reserved`; a link whose forecast fell back is fully loaded and offers none.
pub struct MarginCheck<'a> {
    topology: &'a NetworkTopology,
    loads: &'a HashMap<LinkId, f64>,
    margin: f64,
    reserved: HashMap<LinkId, f64>,
}

#[derive(Debug, Clone, PartialEq)]
struct Widest {
    width: f64,
    node: NodeId,
}

impl Eq for Widest {}

impl Ord for Widest {
    fn cmp(&self, other: &Self) -> Ordering {
        self.width.total_cmp(&other.width).then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for Widest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<'a> MarginCheck<'a> {
    pub fn new(topology: &'a NetworkTopology, loads: &'a HashMap<LinkId, f64>, margin: f64) -> Self {
        MarginCheck { topology, loads, margin, reserved: HashMap::new() }
    }

    /// Removes vetoed links from `sleep_set` and returns them.
    pub fn apply(&mut self, candidates: &[SleepCandidate], sleep_set: &mut HashSet<LinkId>) -> Vec<LinkId> {
        let mut vetoed = Vec::new();

        for candidate in candidates {
            let Some(link) = self.topology.link(&candidate.link_id) else {
                continue;
            };

            let required = candidate.predicted_utilization + self.margin * candidate.capacity;

            match self.widest_path(&link.source, &link.target, sleep_set) {
                Some((width, path)) if width + EPSILON >= required => {
                    for link_id in path {
                        *self.reserved.entry(link_id).or_insert(0.0) += candidate.predicted_utilization;
                    }
                }
                Some((width, _)) => {
                    log::debug!("Margin veto for {}: best alternate path offers {:.3}, needs {:.3}", candidate.link_id, width, required);
                    sleep_set.remove(&candidate.link_id);
                    vetoed.push(candidate.link_id.clone());
                }
                None => {
                    log::debug!("Margin veto for {}: no alternate path", candidate.link_id);
                    sleep_set.remove(&candidate.link_id);
                    vetoed.push(candidate.link_id.clone());
                }
            }
        }

        vetoed
    }

    fn residual(&self, link_id: &LinkId, capacity: f64) -> f64 {
        let load = self.loads.get(link_id).copied().unwrap_or(capacity);
        let reserved = self.reserved.get(link_id).copied().unwrap_or(0.0);
        (capacity - load - reserved).max(0.0)
    }

    /// Maximum-bottleneck path from `from` to `to` over links not in `sleep_set` (modified Dijkstra).
    fn widest_path(&self, from: &NodeId, to: &NodeId, sleep_set: &HashSet<LinkId>) -> Option<(f64, Vec<LinkId>)> {
        let mut best: HashMap<NodeId, f64> = HashMap::new();
        let mut previous: HashMap<NodeId, (NodeId, LinkId)> = HashMap::new();
        let mut heap = BinaryHeap::new();

        best.insert(from.clone(), f64::INFINITY);
        heap.push(Widest { width: f64::INFINITY, node: from.clone() });

        while let Some(Widest { width, node }) = heap.pop() {
            if &node == to {
                break;
            }

            if width < best.get(&node).copied().unwrap_or(f64::NEG_INFINITY) {
                continue;
            }

            for link in self.topology.incident_links(&node) {
                if sleep_set.contains(&link.id) {
                    continue;
                }

                let next = link.other_end(&node).clone();
                let next_width = width.min(self.residual(&link.id, link.capacity));

                if next_width > best.get(&next).copied().unwrap_or(f64::NEG_INFINITY) {
                    best.insert(next.clone(), next_width);
                    previous.insert(next.clone(), (node.clone(), link.id.clone()));
                    heap.push(Widest { width: next_width, node: next });
                }
            }
        }

        let width = *best.get(to)?;

        let mut path = Vec::new();
        let mut current = to.clone();
        while &current != from {
            let (prev_node, link_id) = previous.get(&current)?.clone();
            path.push(link_id);
            current = prev_node;
        }

        Some((width, path))
    }
}
