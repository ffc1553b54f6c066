use std::collections::{BTreeMap, HashMap, HashSet};

use crate::domain::config::EngineConfig;
use crate::domain::decision::capacity_margin::{MarginCheck, SleepCandidate};
use crate::domain::decision::decision::{LinkDecision, Rationale, SlotDecision, TargetState};
use crate::domain::forecast::forecast::{ForecastSet, ForecastStatus};
use crate::domain::topology::link::LinkState;
use crate::domain::topology::network_topology::NetworkTopology;
use crate::domain::utils::id::LinkId;

/// Greedy sleep/wake decision for one slot.
///
/// 1. Links that are transitioning, whose forecast fell back, or whose predicted utilization ratio is at or
///    above the threshold stay (or become) ACTIVE. Waking is never vetoed.
/// 2. The remaining links are sleep-eligible. They are tried lowest predicted load first (ties: lower rated
///    capacity first, then id), each tentative addition checked with the connectivity oracle against the
///    whole tentative set. A link that would cut the graph stays ACTIVE and the pass continues.
/// 3. The surviving set goes through the capacity margin check (see [`MarginCheck`]).
///
/// Links already sleeping and still below threshold are simply eligible again, so a sleeping link that no
/// longer fits the connectivity or margin constraints is woken.
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    sleep_threshold: f64,
    min_active_margin: f64,
}

impl DecisionEngine {
    pub fn new(sleep_threshold: f64, min_active_margin: f64) -> Self {
        DecisionEngine { sleep_threshold, min_active_margin }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.sleep_threshold, config.min_active_margin)
    }

    pub fn decide(&self, snapshot: &NetworkTopology, forecasts: &ForecastSet) -> SlotDecision {
        let mut decisions: BTreeMap<LinkId, LinkDecision> = BTreeMap::new();
        let mut loads: HashMap<LinkId, f64> = HashMap::new();
        let mut eligible: Vec<SleepCandidate> = Vec::new();

        for link in snapshot.links() {
            let (utilization, status) = match forecasts.entry(&link.id) {
                Some(entry) => (entry.effective_utilization(), entry.status),
                None => (link.capacity, ForecastStatus::Missing),
            };
            loads.insert(link.id.clone(), utilization);

            let active = |rationale: Rationale| LinkDecision { target: TargetState::Active, rationale, predicted_utilization: utilization, forecast_status: status };

            if link.state == LinkState::Transitioning {
                decisions.insert(link.id.clone(), active(Rationale::Transitioning));
                continue;
            }

            if status != ForecastStatus::Fresh {
                decisions.insert(link.id.clone(), active(Rationale::ForecastFallback));
                continue;
            }

            if utilization / link.capacity >= self.sleep_threshold {
                let rationale = if link.state == LinkState::Sleeping { Rationale::WakeAboveThreshold } else { Rationale::AboveThreshold };
                decisions.insert(link.id.clone(), active(rationale));
                continue;
            }

            eligible.push(SleepCandidate { link_id: link.id.clone(), predicted_utilization: utilization, capacity: link.capacity });
        }

        eligible.sort_by(|a, b| {
            a.predicted_utilization
                .total_cmp(&b.predicted_utilization)
                .then_with(|| a.capacity.total_cmp(&b.capacity))
                .then_with(|| a.link_id.cmp(&b.link_id))
        });

        let mut sleep_set: HashSet<LinkId> = HashSet::new();
        let mut accepted: Vec<SleepCandidate> = Vec::new();

        for candidate in eligible {
            sleep_set.insert(candidate.link_id.clone());

            if snapshot.is_connected_if_sleeping(&sleep_set) {
                accepted.push(candidate);
            } else {
                log::debug!("Connectivity veto for {} (predicted {:.3})", candidate.link_id, candidate.predicted_utilization);
                sleep_set.remove(&candidate.link_id);
                decisions.insert(
                    candidate.link_id.clone(),
                    LinkDecision {
                        target: TargetState::Active,
                        rationale: Rationale::ConnectivityVeto,
                        predicted_utilization: candidate.predicted_utilization,
                        forecast_status: ForecastStatus::Fresh,
                    },
                );
            }
        }

        let vetoed: HashSet<LinkId> = MarginCheck::new(snapshot, &loads, self.min_active_margin).apply(&accepted, &mut sleep_set).into_iter().collect();

        for candidate in accepted {
            let (target, rationale) = if vetoed.contains(&candidate.link_id) {
                (TargetState::Active, Rationale::MarginVeto)
            } else {
                (TargetState::Sleeping, Rationale::BelowThresholdNonBridging)
            };

            decisions.insert(
                candidate.link_id,
                LinkDecision { target, rationale, predicted_utilization: candidate.predicted_utilization, forecast_status: ForecastStatus::Fresh },
            );
        }

        let decision = SlotDecision { slot: forecasts.slot, decisions };
        log::info!(
            "Slot {} decision: {} to sleep, {} to stay active ({} margin vetoes).",
            decision.slot,
            decision.links_with_target(TargetState::Sleeping).len(),
            decision.links_with_target(TargetState::Active).len(),
            vetoed.len()
        );

        decision
    }
}
