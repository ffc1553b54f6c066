use crate::domain::topology::link::LinkState;
use crate::domain::topology::network_topology::NetworkTopology;

/// Linear two-level power model: every link draws either its active or its standby power.
///
/// A link in `TRANSITIONING` still draws active power. The estimate is non-decreasing in the number of active
/// links for a fixed total.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerModel {
    pub active_power_w: f64,
    pub standby_power_w: f64,
}

impl PowerModel {
    pub fn new(active_power_w: f64, standby_power_w: f64) -> Self {
        PowerModel { active_power_w, standby_power_w }
    }

    pub fn estimate(&self, active_links: usize, sleeping_links: usize) -> f64 {
        active_links as f64 * self.active_power_w + sleeping_links as f64 * self.standby_power_w
    }

    pub fn estimate_topology(&self, topology: &NetworkTopology) -> f64 {
        let (active, sleeping) = Self::link_counts(topology);
        self.estimate(active, sleeping)
    }

    /// (powered, sleeping). Transitioning links count as powered.
    pub fn link_counts(topology: &NetworkTopology) -> (usize, usize) {
        let sleeping = topology.count_in_state(LinkState::Sleeping);
        (topology.link_count() - sleeping, sleeping)
    }

    /// Power saved against keeping every link active.
    pub fn savings(&self, topology: &NetworkTopology) -> f64 {
        self.estimate(topology.link_count(), 0) - self.estimate_topology(topology)
    }
}
