use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::utils::id::{LinkId, NodeId};

/// Administrative state of a link as mirrored from the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkState {
    Active,
    Sleeping,
    /// An action is in flight. Such a link is never a candidate for a new decision.
    Transitioning,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Active => write!(f, "ACTIVE"),
            LinkState::Sleeping => write!(f, "SLEEPING"),
            LinkState::Transitioning => write!(f, "TRANSITIONING"),
        }
    }
}

/// An undirected edge between two topology nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub id: LinkId,
    pub source: NodeId,
    pub target: NodeId,

    /// Rated capacity, in the unit forecasts are expressed in.
    pub capacity: f64,

    pub state: LinkState,

    /// Load predicted for the slot currently being decided, in capacity units.
    pub predicted_utilization: Option<f64>,

    /// Load last reported by the control plane, in capacity units.
    pub confirmed_utilization: Option<f64>,
}

impl Link {
    pub fn new(id: LinkId, source: NodeId, target: NodeId, capacity: f64) -> Self {
        Link { id, source, target, capacity, state: LinkState::Active, predicted_utilization: None, confirmed_utilization: None }
    }

    /// A link carries traffic unless it is sleeping. A transitioning link is counted as up, since the
    /// dispatcher only ever leaves a link transitioning while driving it to a confirmed state.
    pub fn is_up(&self) -> bool {
        self.state != LinkState::Sleeping
    }

    /// The endpoint opposite to `node`.
    pub fn other_end(&self, node: &NodeId) -> &NodeId {
        if &self.source == node { &self.target } else { &self.source }
    }
}
