use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::domain::forecast::forecast::ForecastStatus;
use crate::domain::topology::link::LinkState;
use crate::domain::utils::id::LinkId;

/// State a decision asks a link to be in at the end of the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetState {
    Active,
    Sleeping,
}

impl From<TargetState> for LinkState {
    fn from(target: TargetState) -> Self {
        match target {
            TargetState::Active => LinkState::Active,
            TargetState::Sleeping => LinkState::Sleeping,
        }
    }
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&LinkState::from(*self), f)
    }
}

/// Why a link received its target state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rationale {
    BelowThresholdNonBridging,
    AboveThreshold,
    WakeAboveThreshold,
    ForecastFallback,
    Transitioning,
    ConnectivityVeto,
    MarginVeto,
}

impl fmt::Display for Rationale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Rationale::BelowThresholdNonBridging => "below threshold and non-bridging",
            Rationale::AboveThreshold => "predicted utilization at or above threshold",
            Rationale::WakeAboveThreshold => "woken: forecast back above threshold",
            Rationale::ForecastFallback => "forecast unavailable, fail-safe active",
            Rationale::Transitioning => "transition in flight, held active",
            Rationale::ConnectivityVeto => "sleeping would disconnect the topology",
            Rationale::MarginVeto => "alternate path lacks capacity for demand plus margin",
        };
        write!(f, "{}", text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkDecision {
    pub target: TargetState,
    pub rationale: Rationale,
    /// Utilization the decision was based on (fail-safe value when the forecast was unusable).
    pub predicted_utilization: f64,
    pub forecast_status: ForecastStatus,
}

/// Target state of every link for one slot. One entry of a `SleepPlan`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotDecision {
    pub slot: u64,
    pub decisions: BTreeMap<LinkId, LinkDecision>,
}

impl SlotDecision {
    /// Links that will be asleep once this decision is applied.
    pub fn sleep_set(&self) -> HashSet<LinkId> {
        self.links_with_target(TargetState::Sleeping).into_iter().collect()
    }

    pub fn links_with_target(&self, target: TargetState) -> Vec<LinkId> {
        self.decisions.iter().filter(|(_, d)| d.target == target).map(|(id, _)| id.clone()).collect()
    }

    pub fn get(&self, link_id: &LinkId) -> Option<&LinkDecision> {
        self.decisions.get(link_id)
    }

    pub fn target_of(&self, link_id: &LinkId) -> Option<TargetState> {
        self.decisions.get(link_id).map(|d| d.target)
    }
}
