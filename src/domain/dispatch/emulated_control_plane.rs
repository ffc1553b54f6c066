use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::domain::dispatch::control_plane::{ControlPlane, PortAction, PortStatus};
use crate::domain::topology::link::LinkState;
use crate::domain::topology::network_topology::NetworkTopology;
use crate::domain::utils::id::LinkId;
use crate::error::ControlPlaneError;

#[derive(Debug, Default)]
struct EmulatedState {
    ports_up: HashMap<LinkId, bool>,
    utilization: HashMap<LinkId, f64>,
    rejecting: HashSet<LinkId>,
    transient_failures: HashMap<LinkId, u32>,
    unresponsive: HashSet<LinkId>,
    random_faults: Option<(f64, StdRng)>,
    applied: HashMap<LinkId, Vec<PortAction>>,
    apply_delay: Duration,
}

/// In-process stand-in for an SDN controller. Ports flip immediately on `apply`; faults can be injected per
/// link to exercise the dispatcher's retry and rollback paths.
#[derive(Debug, Clone, Default)]
pub struct EmulatedControlPlane {
    state: Arc<Mutex<EmulatedState>>,
}

impl EmulatedControlPlane {
    pub fn new<'a>(links: impl IntoIterator<Item = &'a LinkId>) -> Self {
        let plane = EmulatedControlPlane::default();
        {
            let mut state = plane.lock();
            for link_id in links {
                state.ports_up.insert(link_id.clone(), true);
            }
        }
        plane
    }

    /// Ports mirror the current link states of `topology`.
    pub fn from_topology(topology: &NetworkTopology) -> Self {
        let plane = EmulatedControlPlane::default();
        {
            let mut state = plane.lock();
            for link in topology.links() {
                state.ports_up.insert(link.id.clone(), link.state != LinkState::Sleeping);
            }
        }
        plane
    }

    fn lock(&self) -> MutexGuard<'_, EmulatedState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every action on `link_id` is refused.
    pub fn reject_link(&self, link_id: &LinkId) {
        self.lock().rejecting.insert(link_id.clone());
    }

    /// The next `count` actions on `link_id` fail with a transient error.
    pub fn fail_transiently(&self, link_id: &LinkId, count: u32) {
        self.lock().transient_failures.insert(link_id.clone(), count);
    }

    /// Actions on `link_id` are acknowledged but never take effect, so confirmation times out.
    pub fn never_confirm(&self, link_id: &LinkId) {
        self.lock().unresponsive.insert(link_id.clone());
    }

    /// Each action fails transiently with the given probability. Seeded for reproducible runs.
    pub fn with_random_faults(self, probability: f64, seed: u64) -> Self {
        self.lock().random_faults = Some((probability.clamp(0.0, 1.0), StdRng::seed_from_u64(seed)));
        self
    }

    pub fn set_apply_delay(&self, delay: Duration) {
        self.lock().apply_delay = delay;
    }

    pub fn set_utilization(&self, link_id: &LinkId, value: f64) {
        self.lock().utilization.insert(link_id.clone(), value);
    }

    pub fn is_port_up(&self, link_id: &LinkId) -> Option<bool> {
        self.lock().ports_up.get(link_id).copied()
    }

    /// Actions accepted for `link_id`, in order.
    pub fn applied_actions(&self, link_id: &LinkId) -> Vec<PortAction> {
        self.lock().applied.get(link_id).cloned().unwrap_or_default()
    }

    pub fn total_applied(&self) -> usize {
        self.lock().applied.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl ControlPlane for EmulatedControlPlane {
    async fn apply(&self, link_id: &LinkId, action: PortAction) -> Result<(), ControlPlaneError> {
        let delay = self.lock().apply_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();

        if !state.ports_up.contains_key(link_id) {
            return Err(ControlPlaneError::Rejected(format!("no port mapped for link {}", link_id)));
        }

        if state.rejecting.contains(link_id) {
            return Err(ControlPlaneError::Rejected(format!("port for link {} is administratively locked", link_id)));
        }

        if let Some(remaining) = state.transient_failures.get_mut(link_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ControlPlaneError::Transient(format!("controller busy while handling link {}", link_id)));
            }
        }

        if let Some((probability, rng)) = state.random_faults.as_mut() {
            if rng.random_bool(*probability) {
                return Err(ControlPlaneError::Transient(format!("injected fault on link {}", link_id)));
            }
        }

        state.applied.entry(link_id.clone()).or_default().push(action);

        if !state.unresponsive.contains(link_id) {
            state.ports_up.insert(link_id.clone(), action.expects_admin_up());
        }

        Ok(())
    }

    async fn query_status(&self, link_id: &LinkId) -> Result<PortStatus, ControlPlaneError> {
        let state = self.lock();
        match state.ports_up.get(link_id) {
            Some(&up) => Ok(PortStatus { admin_up: up, oper_up: up, utilization: state.utilization.get(link_id).copied() }),
            None => Err(ControlPlaneError::Rejected(format!("no port mapped for link {}", link_id))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transient_failures_are_consumed() {
        let link = LinkId::new("l1");
        let plane = EmulatedControlPlane::new([&link]);
        plane.fail_transiently(&link, 2);

        assert!(matches!(plane.apply(&link, PortAction::SetPortDown).await, Err(ControlPlaneError::Transient(_))));
        assert!(matches!(plane.apply(&link, PortAction::SetPortDown).await, Err(ControlPlaneError::Transient(_))));
        assert!(plane.apply(&link, PortAction::SetPortDown).await.is_ok());
        assert_eq!(plane.is_port_up(&link), Some(false));
    }

    #[tokio::test]
    async fn test_unresponsive_port_keeps_state() {
        let link = LinkId::new("l1");
        let plane = EmulatedControlPlane::new([&link]);
        plane.never_confirm(&link);

        assert!(plane.apply(&link, PortAction::SetPortDown).await.is_ok());
        let status = plane.query_status(&link).await.unwrap();
        assert!(status.admin_up);
        assert_eq!(plane.applied_actions(&link), vec![PortAction::SetPortDown]);
    }
}
