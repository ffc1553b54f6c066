use crate::api::topology_dto::TopologyDto;
use crate::domain::topology::link::{Link, LinkState};
use crate::domain::utils::id::{LinkId, NodeId};
use crate::error::{Error, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use union_find::{QuickUnionUf, UnionBySize, UnionFind};

/// Models the backhaul graph.
///
/// The `NetworkTopology` owns:
/// * **Nodes**: switches and base stations, identified by `NodeId`.
/// * **Links**: undirected edges with rated capacity and administrative state.
/// * **Adjacency**: `NodeId` to incident `LinkId`s, used by every traversal.
///
/// Parallel links between the same pair of nodes are allowed. Self loops are not.
#[derive(Debug, Clone)]
pub struct NetworkTopology {
    nodes: BTreeSet<NodeId>,
    links: BTreeMap<LinkId, Link>,
    adjacency: BTreeMap<NodeId, BTreeSet<LinkId>>,
}

impl TryFrom<TopologyDto> for NetworkTopology {
    type Error = Error;

    fn try_from(dto: TopologyDto) -> Result<Self> {
        let nodes: Vec<NodeId> = dto.nodes.into_iter().map(|n| NodeId::new(n.id)).collect();
        let links: Vec<Link> = dto
            .links
            .into_iter()
            .map(|l| Link::new(LinkId::new(l.id), NodeId::new(l.source), NodeId::new(l.target), l.capacity))
            .collect();

        NetworkTopology::load_topology(nodes, links)
    }
}

impl NetworkTopology {
    /// Builds and validates the graph. Every problem with the description is a `ConfigError`, because no slot
    /// can be processed safely against a topology that does not match the network.
    ///
    /// The full graph (all links up) must be connected, otherwise the connectivity invariant could never hold.
    pub fn load_topology(nodes: Vec<NodeId>, links: Vec<Link>) -> Result<Self> {
        if nodes.is_empty() {
            return Err(Error::ConfigError("topology contains no nodes".to_string()));
        }

        let mut node_set: BTreeSet<NodeId> = BTreeSet::new();
        for node in nodes {
            if !node_set.insert(node.clone()) {
                return Err(Error::ConfigError(format!("duplicate node id '{}'", node)));
            }
        }

        let mut link_map: BTreeMap<LinkId, Link> = BTreeMap::new();
        let mut adjacency: BTreeMap<NodeId, BTreeSet<LinkId>> = node_set.iter().map(|n| (n.clone(), BTreeSet::new())).collect();

        for link in links {
            if !node_set.contains(&link.source) {
                return Err(Error::ConfigError(format!("link '{}' references unknown node '{}'", link.id, link.source)));
            }

            if !node_set.contains(&link.target) {
                return Err(Error::ConfigError(format!("link '{}' references unknown node '{}'", link.id, link.target)));
            }

            if link.source == link.target {
                return Err(Error::ConfigError(format!("link '{}' is a self loop on '{}'", link.id, link.source)));
            }

            if !link.capacity.is_finite() || link.capacity <= 0.0 {
                return Err(Error::ConfigError(format!("link '{}' has invalid capacity {}", link.id, link.capacity)));
            }

            if link_map.contains_key(&link.id) {
                return Err(Error::ConfigError(format!("duplicate link id '{}'", link.id)));
            }

            adjacency.entry(link.source.clone()).or_default().insert(link.id.clone());
            adjacency.entry(link.target.clone()).or_default().insert(link.id.clone());
            link_map.insert(link.id.clone(), link);
        }

        let topology = NetworkTopology { nodes: node_set, links: link_map, adjacency };

        let components = topology.count_components();
        if components != 1 {
            return Err(Error::ConfigError(format!("topology is not connected: {} components with all links active", components)));
        }

        log::info!("Loaded topology with {} nodes and {} links.", topology.nodes.len(), topology.links.len());

        Ok(topology)
    }

    /// Number of connected components of the full graph, ignoring link state.
    fn count_components(&self) -> usize {
        let index: HashMap<&NodeId, usize> = self.nodes.iter().enumerate().map(|(i, n)| (n, i)).collect();
        let mut dsu = QuickUnionUf::<UnionBySize>::new(self.nodes.len());

        for link in self.links.values() {
            dsu.union(index[&link.source], index[&link.target]);
        }

        let roots: HashSet<usize> = (0..self.nodes.len()).map(|i| dsu.find(i)).collect();
        roots.len()
    }

    /// Safety oracle: is the graph restricted to the links NOT in `candidates` connected?
    ///
    /// The whole candidate set is removed at once and a single BFS runs from an arbitrary root, because
    /// removing two individually harmless links together can still cut the graph. The current link state is
    /// deliberately ignored: the caller passes the complete set of links that would be asleep.
    pub fn is_connected_if_sleeping(&self, candidates: &HashSet<LinkId>) -> bool {
        self.is_connected_where(|link| !candidates.contains(&link.id))
    }

    /// Connectivity of the topology as it currently stands (sleeping links removed).
    pub fn is_connected(&self) -> bool {
        self.is_connected_where(Link::is_up)
    }

    fn is_connected_where<F: Fn(&Link) -> bool>(&self, is_up: F) -> bool {
        let Some(root) = self.nodes.iter().next() else {
            return true;
        };

        self.reachable_from(root, &is_up).len() == self.nodes.len()
    }

    fn reachable_from<F: Fn(&Link) -> bool>(&self, root: &NodeId, is_up: &F) -> HashSet<NodeId> {
        let mut visited: HashSet<NodeId> = HashSet::new();
        let mut queue: VecDeque<&NodeId> = VecDeque::new();

        visited.insert(root.clone());
        queue.push_back(root);

        while let Some(node) = queue.pop_front() {
            for link_id in self.adjacency.get(node).into_iter().flatten() {
                let Some(link) = self.links.get(link_id) else {
                    continue;
                };

                if !is_up(link) {
                    continue;
                }

                let next = link.other_end(node);
                if visited.insert(next.clone()) {
                    queue.push_back(next);
                }
            }
        }

        visited
    }

    /// Links whose removal would disconnect the currently non-sleeping subgraph (Tarjan's bridge finding).
    pub fn bridges(&self) -> BTreeSet<LinkId> {
        let mut disc: HashMap<&NodeId, usize> = HashMap::new();
        let mut low: HashMap<&NodeId, usize> = HashMap::new();
        let mut timer = 0;
        let mut bridges = BTreeSet::new();

        for node in &self.nodes {
            if !disc.contains_key(node) {
                self.bridge_dfs(node, None, &mut timer, &mut disc, &mut low, &mut bridges);
            }
        }

        bridges
    }

    fn bridge_dfs<'a>(
        &'a self,
        node: &'a NodeId,
        parent_link: Option<&'a LinkId>,
        timer: &mut usize,
        disc: &mut HashMap<&'a NodeId, usize>,
        low: &mut HashMap<&'a NodeId, usize>,
        bridges: &mut BTreeSet<LinkId>,
    ) {
        *timer += 1;
        disc.insert(node, *timer);
        low.insert(node, *timer);

        for link_id in self.adjacency.get(node).into_iter().flatten() {
            // Skip by link id, not by node, so a parallel link back to the parent counts as a cycle.
            if parent_link == Some(link_id) {
                continue;
            }

            let Some(link) = self.links.get(link_id) else {
                continue;
            };

            if !link.is_up() {
                continue;
            }

            let next = link.other_end(node);

            match disc.get(next).copied() {
                Some(next_disc) => {
                    let current_low = low[node];
                    low.insert(node, current_low.min(next_disc));
                }
                None => {
                    self.bridge_dfs(next, Some(link_id), timer, disc, low, bridges);

                    let next_low = low[next];
                    let current_low = low[node];
                    low.insert(node, current_low.min(next_low));

                    if next_low > disc[node] {
                        bridges.insert(link_id.clone());
                    }
                }
            }
        }
    }

    /// Sets the administrative state of one link and returns its previous state.
    pub fn apply_state(&mut self, link_id: &LinkId, new_state: LinkState) -> Result<LinkState> {
        let link = self.links.get_mut(link_id).ok_or_else(|| Error::UnknownLinkError(link_id.clone()))?;
        let previous = link.state;
        link.state = new_state;
        Ok(previous)
    }

    pub fn set_predicted_utilization(&mut self, link_id: &LinkId, value: f64) -> Result<()> {
        let link = self.links.get_mut(link_id).ok_or_else(|| Error::UnknownLinkError(link_id.clone()))?;
        link.predicted_utilization = Some(value);
        Ok(())
    }

    pub fn set_confirmed_utilization(&mut self, link_id: &LinkId, value: f64) -> Result<()> {
        let link = self.links.get_mut(link_id).ok_or_else(|| Error::UnknownLinkError(link_id.clone()))?;
        link.confirmed_utilization = Some(value);
        Ok(())
    }

    pub fn link(&self, link_id: &LinkId) -> Option<&Link> {
        self.links.get(link_id)
    }

    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.links.values()
    }

    pub fn link_ids(&self) -> impl Iterator<Item = &LinkId> {
        self.links.keys()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.iter()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Links incident to `node`, in id order.
    pub fn incident_links(&self, node: &NodeId) -> impl Iterator<Item = &Link> {
        self.adjacency.get(node).into_iter().flatten().filter_map(|id| self.links.get(id))
    }

    pub fn links_in_state(&self, state: LinkState) -> BTreeSet<LinkId> {
        self.links.values().filter(|l| l.state == state).map(|l| l.id.clone()).collect()
    }

    pub fn count_in_state(&self, state: LinkState) -> usize {
        self.links.values().filter(|l| l.state == state).count()
    }
}
