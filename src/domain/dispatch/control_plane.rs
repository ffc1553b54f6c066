use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};

use crate::domain::decision::decision::TargetState;
use crate::domain::topology::link::LinkState;
use crate::domain::utils::id::LinkId;
use crate::error::ControlPlaneError;

/// Port-level command sent to the SDN controller for one link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PortAction {
    SetPortDown,
    SetPortUp,
}

impl PortAction {
    pub fn towards(target: TargetState) -> Self {
        match target {
            TargetState::Active => PortAction::SetPortUp,
            TargetState::Sleeping => PortAction::SetPortDown,
        }
    }

    /// Action that brings a link back to `state`. A transitioning link is brought up.
    pub fn restoring(state: LinkState) -> Self {
        match state {
            LinkState::Sleeping => PortAction::SetPortDown,
            LinkState::Active | LinkState::Transitioning => PortAction::SetPortUp,
        }
    }

    /// Administrative port state the controller reports once the action took effect.
    pub fn expects_admin_up(&self) -> bool {
        matches!(self, PortAction::SetPortUp)
    }

    /// Link state the topology records once the action is confirmed.
    pub fn resulting_state(&self) -> LinkState {
        match self {
            PortAction::SetPortDown => LinkState::Sleeping,
            PortAction::SetPortUp => LinkState::Active,
        }
    }
}

impl fmt::Display for PortAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortAction::SetPortDown => write!(f, "set_port_down"),
            PortAction::SetPortUp => write!(f, "set_port_up"),
        }
    }
}

/// Link status as reported by the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct PortStatus {
    pub admin_up: bool,
    pub oper_up: bool,
    /// Measured utilization in capacity units, when the controller exposes it.
    pub utilization: Option<f64>,
}

/// Southbound interface of the command dispatcher. Implementations talk to an SDN controller (or emulate
/// one); they report failures per call and never retry on their own.
#[async_trait]
pub trait ControlPlane: Debug + Send + Sync {
    async fn apply(&self, link_id: &LinkId, action: PortAction) -> Result<(), ControlPlaneError>;

    async fn query_status(&self, link_id: &LinkId) -> Result<PortStatus, ControlPlaneError>;
}
