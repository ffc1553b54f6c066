use futures::future::join_all;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::domain::config::DispatchConfig;
use crate::domain::decision::decision::{SlotDecision, TargetState};
use crate::domain::dispatch::control_plane::{ControlPlane, PortAction, PortStatus};
use crate::domain::metrics::aggregator::ANALYTICS_TARGET;
use crate::domain::topology::link::LinkState;
use crate::domain::topology::state_model::TopologyWriter;
use crate::domain::utils::id::LinkId;
use crate::error::{ControlPlaneError, Error, Result};

/// Lifecycle of one link's action within a dispatched batch.
///
/// `PENDING -> APPLYING -> CONFIRMED`, or `APPLYING -> FAILED -> ROLLING_BACK -> ROLLED_BACK`. A link that needs
/// no action goes straight from `PENDING` to `CONFIRMED`; a link whose action is withdrawn before it is sent
/// goes from `PENDING` to `FAILED`. Nothing is `CONFIRMED` before the whole batch has been re-verified as
/// connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchState {
    Pending,
    Applying,
    Confirmed,
    Failed,
    RollingBack,
    RolledBack,
}

impl DispatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DispatchState::Confirmed | DispatchState::RolledBack)
    }

    fn can_move_to(&self, next: DispatchState) -> bool {
        use DispatchState::*;
        matches!(
            (self, next),
            (Pending, Applying) | (Pending, Confirmed) | (Pending, Failed) | (Applying, Confirmed) | (Applying, Failed) | (Failed, RollingBack) | (RollingBack, RolledBack)
        )
    }
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DispatchState::Pending => "PENDING",
            DispatchState::Applying => "APPLYING",
            DispatchState::Confirmed => "CONFIRMED",
            DispatchState::Failed => "FAILED",
            DispatchState::RollingBack => "ROLLING_BACK",
            DispatchState::RolledBack => "ROLLED_BACK",
        };
        write!(f, "{}", text)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LinkOutcome {
    pub slot: u64,
    pub link_id: LinkId,
    pub target: TargetState,
    pub previous_state: LinkState,
    /// Link state recorded in the topology once the outcome is terminal.
    pub final_link_state: LinkState,
    /// `None` when the link was already in its target state.
    pub action: Option<PortAction>,
    pub state: DispatchState,
    pub transitions: Vec<(DispatchState, DispatchState)>,
    pub attempts: u32,
    pub error: Option<String>,
}

impl LinkOutcome {
    fn new(slot: u64, link_id: LinkId, target: TargetState, previous_state: LinkState) -> Self {
        LinkOutcome {
            slot,
            link_id,
            target,
            previous_state,
            final_link_state: previous_state,
            action: None,
            state: DispatchState::Pending,
            transitions: Vec::new(),
            attempts: 0,
            error: None,
        }
    }

    fn transition(&mut self, next: DispatchState) {
        if !self.state.can_move_to(next) {
            log::error!("Ignoring illegal dispatch transition {} -> {} for link {}", self.state, next, self.link_id);
            return;
        }

        tracing::info!(target: ANALYTICS_TARGET, slot = self.slot, link = %self.link_id, from = %self.state, to = %next, "dispatch transition");
        self.transitions.push((self.state, next));
        self.state = next;
    }

    fn fail(&mut self, reason: String) {
        self.error = Some(reason);
        self.transition(DispatchState::Failed);
    }

    /// Fails and rolls back a link whose action was never sent. Nothing to undo.
    fn withdraw(&mut self, reason: String) {
        self.fail(reason);
        self.transition(DispatchState::RollingBack);
        self.transition(DispatchState::RolledBack);
    }

    pub fn was_acted_on(&self) -> bool {
        self.attempts > 0
    }
}

/// Result of dispatching one slot's decision.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub slot: u64,
    pub outcomes: BTreeMap<LinkId, LinkOutcome>,
    /// Set when the decided sleep set or the applied batch disconnected the topology.
    pub violation: Option<String>,
    /// Result of the final connectivity check after the batch (and any recovery) was applied.
    pub connectivity_ok: bool,
    pub cancelled: bool,
}

impl DispatchReport {
    fn new(slot: u64) -> Self {
        DispatchReport { slot, outcomes: BTreeMap::new(), violation: None, connectivity_ok: false, cancelled: false }
    }

    pub fn outcome(&self, link_id: &LinkId) -> Option<&LinkOutcome> {
        self.outcomes.get(link_id)
    }

    pub fn count_in(&self, state: DispatchState) -> usize {
        self.outcomes.values().filter(|o| o.state == state).count()
    }

    /// Links that needed an action (whether or not it succeeded).
    pub fn dispatched_actions(&self) -> usize {
        self.outcomes.values().filter(|o| o.action.is_some()).count()
    }

    pub fn confirmed_actions(&self) -> usize {
        self.outcomes.values().filter(|o| o.action.is_some() && o.state == DispatchState::Confirmed).count()
    }

    pub fn rolled_back(&self) -> Vec<LinkId> {
        self.outcomes.values().filter(|o| o.state == DispatchState::RolledBack).map(|o| o.link_id.clone()).collect()
    }

    pub fn transition_count(&self) -> usize {
        self.outcomes.values().map(|o| o.transitions.len()).sum()
    }

    pub fn all_terminal(&self) -> bool {
        self.outcomes.values().all(|o| o.state.is_terminal())
    }
}

/// Turns a slot decision into control-plane actions and keeps the topology state model in step with what the
/// network actually confirmed.
///
/// Wakes are applied before sleeps. Between the two phases the pending sleeps are re-checked against the
/// links that are really up, so a failed wake can never leave a sleep disconnecting the graph. Actions within a
/// phase run concurrently. Each action is retried with exponential backoff on transient errors, bounded by a
/// per-attempt timeout, and confirmed by polling the link status. A failed link is rolled back to its previous
/// state; the rest of the batch proceeds. After the batch, connectivity is verified against the status the
/// control plane reports for every link; if the network is cut, the batch's sleeps are undone.
#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    control_plane: Arc<dyn ControlPlane>,
    config: DispatchConfig,
}

impl CommandDispatcher {
    pub fn new(control_plane: Arc<dyn ControlPlane>, config: DispatchConfig) -> Self {
        CommandDispatcher { control_plane, config }
    }

    /// Only an unknown link in `decision` is an error; every per-link failure is contained in the report.
    pub async fn dispatch(&self, writer: &TopologyWriter, decision: &SlotDecision, cancel: &CancellationToken) -> Result<DispatchReport> {
        let slot = decision.slot;
        let snapshot = writer.snapshot();
        let mut report = DispatchReport::new(slot);

        let mut targets: BTreeMap<LinkId, (TargetState, LinkState)> = BTreeMap::new();
        for (link_id, link_decision) in &decision.decisions {
            let link = snapshot.link(link_id).ok_or_else(|| Error::UnknownLinkError(link_id.clone()))?;
            targets.insert(link_id.clone(), (link_decision.target, link.state));
        }

        if !snapshot.is_connected_if_sleeping(&decision.sleep_set()) {
            let violation = Error::ConnectivityViolationDetected { slot, detail: "decided sleep set disconnects the topology".to_string() };
            log::error!("{}. Keeping every link active for this slot.", violation);
            report.violation = Some(violation.to_string());
            for (target, _) in targets.values_mut() {
                *target = TargetState::Active;
            }
        }

        let mut wakes: Vec<LinkOutcome> = Vec::new();
        let mut sleeps: Vec<LinkOutcome> = Vec::new();
        for (link_id, (target, current)) in targets {
            let outcome = LinkOutcome::new(slot, link_id, target, current);
            if current == LinkState::Transitioning {
                log::warn!("Link {} is still transitioning; no action sent in slot {}", outcome.link_id, slot);
                report.outcomes.insert(outcome.link_id.clone(), outcome);
            } else if LinkState::from(target) == current {
                report.outcomes.insert(outcome.link_id.clone(), outcome);
            } else if target == TargetState::Active {
                wakes.push(outcome);
            } else {
                sleeps.push(outcome);
            }
        }

        for outcome in join_all(wakes.into_iter().map(|o| self.drive(writer, o, cancel))).await {
            report.outcomes.insert(outcome.link_id.clone(), outcome);
        }

        let after_wakes = writer.snapshot();
        let mut asleep: HashSet<LinkId> = after_wakes.links_in_state(LinkState::Sleeping).into_iter().collect();
        let mut approved: Vec<LinkOutcome> = Vec::new();
        for mut outcome in sleeps {
            asleep.insert(outcome.link_id.clone());
            if after_wakes.is_connected_if_sleeping(&asleep) {
                approved.push(outcome);
            } else {
                asleep.remove(&outcome.link_id);
                tracing::warn!(slot, link = %outcome.link_id, "sleep withdrawn: topology after wakes would be disconnected");
                outcome.withdraw("sleeping would disconnect the topology as it stands after the wake phase".to_string());
                report.outcomes.insert(outcome.link_id.clone(), outcome);
            }
        }

        for outcome in join_all(approved.into_iter().map(|o| self.drive(writer, o, cancel))).await {
            report.outcomes.insert(outcome.link_id.clone(), outcome);
        }

        let mut connected = self.verify_connectivity(writer).await;
        if !connected {
            let violation = Error::ConnectivityViolationDetected { slot, detail: "topology disconnected after applying the batch".to_string() };
            log::error!("{}. Waking every link put to sleep in this slot.", violation);
            report.violation = Some(violation.to_string());
            self.recover(writer, &mut report, &violation.to_string()).await;

            connected = self.verify_connectivity(writer).await;
            if !connected {
                log::error!("Topology is still disconnected after recovery in slot {}", slot);
            }
        }
        report.connectivity_ok = connected;

        for outcome in report.outcomes.values_mut() {
            if matches!(outcome.state, DispatchState::Pending | DispatchState::Applying) {
                outcome.transition(DispatchState::Confirmed);
            }
        }
        report.cancelled = cancel.is_cancelled();

        log::info!(
            "Slot {} dispatch: {} actions, {} confirmed, {} rolled back, connectivity {}.",
            slot,
            report.dispatched_actions(),
            report.confirmed_actions(),
            report.count_in(DispatchState::RolledBack),
            if connected { "ok" } else { "VIOLATED" }
        );

        Ok(report)
    }

    /// Connectivity as the network reports it: a link counts as down when it is sleeping in the model or the
    /// control plane reports it operationally down. Links whose status cannot be read keep their model state.
    async fn verify_connectivity(&self, writer: &TopologyWriter) -> bool {
        let snapshot = writer.snapshot();
        let link_ids: Vec<LinkId> = snapshot.link_ids().cloned().collect();
        let statuses = join_all(link_ids.iter().map(|id| timeout(self.config.action_timeout, self.control_plane.query_status(id)))).await;

        let mut down: HashSet<LinkId> = snapshot.links_in_state(LinkState::Sleeping).into_iter().collect();
        for (link_id, status) in link_ids.into_iter().zip(statuses) {
            if let Ok(Ok(status)) = status {
                if !status.oper_up {
                    log::warn!("Link {} is reported operationally down", link_id);
                    down.insert(link_id);
                }
            }
        }

        snapshot.is_connected_if_sleeping(&down)
    }

    /// Forces every link slept by this batch back to ACTIVE. Ignores cancellation.
    async fn recover(&self, writer: &TopologyWriter, report: &mut DispatchReport, reason: &str) {
        let to_wake: Vec<LinkId> = report
            .outcomes
            .values()
            .filter(|o| o.state == DispatchState::Applying && o.target == TargetState::Sleeping)
            .map(|o| o.link_id.clone())
            .collect();

        let restored = join_all(to_wake.iter().map(|link_id| self.restore(link_id, LinkState::Active))).await;

        for (link_id, state) in to_wake.iter().zip(restored) {
            self.record_state(writer, link_id, state);
            if let Some(outcome) = report.outcomes.get_mut(link_id) {
                outcome.fail(reason.to_string());
                outcome.transition(DispatchState::RollingBack);
                outcome.final_link_state = state;
                outcome.transition(DispatchState::RolledBack);
            }
        }
    }

    async fn drive(&self, writer: &TopologyWriter, mut outcome: LinkOutcome, cancel: &CancellationToken) -> LinkOutcome {
        let link_id = outcome.link_id.clone();
        let action = PortAction::towards(outcome.target);
        outcome.action = Some(action);

        if cancel.is_cancelled() {
            outcome.withdraw(Error::DispatchCancelled(link_id).to_string());
            return outcome;
        }

        outcome.transition(DispatchState::Applying);
        self.record_state(writer, &link_id, LinkState::Transitioning);

        let mut attempts = 0;
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::DispatchCancelled(link_id.clone())),
            r = self.apply_and_confirm(&link_id, action, &mut attempts) => r,
        };
        outcome.attempts = attempts;

        match result {
            Ok(status) => {
                let state = action.resulting_state();
                self.record_state(writer, &link_id, state);
                if let Some(utilization) = status.utilization {
                    if let Err(e) = writer.record_confirmed_utilization(&link_id, utilization) {
                        log::warn!("Cannot record utilization for {}: {}", link_id, e);
                    }
                }
                outcome.final_link_state = state;
            }
            Err(e) => {
                tracing::warn!(slot = outcome.slot, link = %link_id, action = %action, error = %e, "link action failed, rolling back");
                outcome.fail(e.to_string());
                outcome.transition(DispatchState::RollingBack);

                let state = if attempts == 0 { outcome.previous_state } else { self.restore(&link_id, outcome.previous_state).await };
                self.record_state(writer, &link_id, state);
                outcome.final_link_state = state;
                outcome.transition(DispatchState::RolledBack);
            }
        }

        outcome
    }

    /// Brings the link back to `state` and returns the state it is actually in afterwards. When the restoring
    /// action fails too the controller is asked; a link whose state cannot be established is recorded as
    /// SLEEPING so connectivity checks never count on it.
    async fn restore(&self, link_id: &LinkId, state: LinkState) -> LinkState {
        let mut attempts = 0;
        let action = PortAction::restoring(state);

        match self.apply_and_confirm(link_id, action, &mut attempts).await {
            Ok(_) => action.resulting_state(),
            Err(e) => {
                tracing::error!(link = %link_id, action = %action, error = %e, "rollback failed");
                match timeout(self.config.action_timeout, self.control_plane.query_status(link_id)).await {
                    Ok(Ok(status)) if status.admin_up => LinkState::Active,
                    Ok(Ok(_)) => LinkState::Sleeping,
                    _ => {
                        log::error!("State of link {} is unknown after failed rollback; treating it as sleeping", link_id);
                        LinkState::Sleeping
                    }
                }
            }
        }
    }

    fn record_state(&self, writer: &TopologyWriter, link_id: &LinkId, state: LinkState) {
        if let Err(e) = writer.apply_state(link_id, state) {
            log::error!("Cannot record state {} for link {}: {}", state, link_id, e);
        }
    }

    async fn apply_and_confirm(&self, link_id: &LinkId, action: PortAction, attempts: &mut u32) -> Result<PortStatus> {
        loop {
            *attempts += 1;

            let failure = match timeout(self.config.action_timeout, self.control_plane.apply(link_id, action)).await {
                Ok(Ok(())) => break,
                Ok(Err(ControlPlaneError::Rejected(reason))) => return Err(Error::DispatchRejected { link_id: link_id.clone(), reason }),
                Ok(Err(ControlPlaneError::Transient(reason))) => {
                    Error::DispatchRejected { link_id: link_id.clone(), reason: format!("transient failure persisted: {}", reason) }
                }
                Err(_) => Error::DispatchTimeout { link_id: link_id.clone(), timeout_ms: self.config.action_timeout.as_millis() as u64 },
            };

            if *attempts > self.config.max_retries {
                return Err(failure);
            }

            let delay = self.backoff(*attempts);
            tracing::debug!(link = %link_id, attempt = *attempts, delay_ms = delay.as_millis() as u64, error = %failure, "retrying link action");
            sleep(delay).await;
        }

        self.await_confirmation(link_id, action).await
    }

    async fn await_confirmation(&self, link_id: &LinkId, action: PortAction) -> Result<PortStatus> {
        let deadline = Instant::now() + self.config.confirm_timeout;
        let expects_up = action.expects_admin_up();

        loop {
            match timeout(self.config.action_timeout, self.control_plane.query_status(link_id)).await {
                Ok(Ok(status)) if status.admin_up == expects_up => return Ok(status),
                Ok(Ok(_)) => {}
                Ok(Err(ControlPlaneError::Rejected(reason))) => return Err(Error::DispatchRejected { link_id: link_id.clone(), reason }),
                Ok(Err(ControlPlaneError::Transient(reason))) => tracing::debug!(link = %link_id, reason = %reason, "status query failed"),
                Err(_) => tracing::debug!(link = %link_id, "status query timed out"),
            }

            if Instant::now() >= deadline {
                return Err(Error::DispatchTimeout { link_id: link_id.clone(), timeout_ms: self.config.confirm_timeout.as_millis() as u64 });
            }
            sleep(self.config.confirm_poll).await;
        }
    }

    /// Exponential backoff with up to 10% random jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.config.backoff_for(attempt);
        let jitter_ms = base.as_millis() as u64 / 10;

        if jitter_ms == 0 { base } else { base + Duration::from_millis(rand::rng().random_range(0..=jitter_ms)) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::decision::decision::{LinkDecision, Rationale};
    use crate::domain::dispatch::emulated_control_plane::EmulatedControlPlane;
    use crate::domain::forecast::forecast::ForecastStatus;
    use crate::domain::topology::link::Link;
    use crate::domain::topology::state_model::TopologyStateModel;
    use crate::domain::utils::id::NodeId;
    use tracing_test::traced_test;

    fn ring() -> (TopologyStateModel, TopologyWriter) {
        let nodes = ["a", "b", "c", "d"].iter().map(|n| NodeId::new(*n)).collect();
        let links = [("ab", "a", "b"), ("bc", "b", "c"), ("cd", "c", "d"), ("da", "d", "a")]
            .iter()
            .map(|(id, s, t)| Link::new(LinkId::new(*id), NodeId::new(*s), NodeId::new(*t), 100.0))
            .collect();
        TopologyStateModel::load_topology(nodes, links).unwrap()
    }

    fn decision_sleeping(slot: u64, asleep: &[&str]) -> SlotDecision {
        let decisions = ["ab", "bc", "cd", "da"]
            .iter()
            .map(|id| {
                let sleeping = asleep.contains(id);
                let link_decision = LinkDecision {
                    target: if sleeping { TargetState::Sleeping } else { TargetState::Active },
                    rationale: if sleeping { Rationale::BelowThresholdNonBridging } else { Rationale::AboveThreshold },
                    predicted_utilization: if sleeping { 0.0 } else { 80.0 },
                    forecast_status: ForecastStatus::Fresh,
                };
                (LinkId::new(*id), link_decision)
            })
            .collect();
        SlotDecision { slot, decisions }
    }

    fn fast_config() -> DispatchConfig {
        DispatchConfig {
            action_timeout: Duration::from_millis(200),
            confirm_timeout: Duration::from_millis(100),
            confirm_poll: Duration::from_millis(5),
            max_retries: 2,
            backoff_base: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_rejected_link_is_rolled_back_and_logged() {
        let (model, writer) = ring();
        let plane = EmulatedControlPlane::from_topology(&model.snapshot());
        plane.reject_link(&LinkId::new("ab"));
        let dispatcher = CommandDispatcher::new(Arc::new(plane.clone()), fast_config());

        let report = dispatcher.dispatch(&writer, &decision_sleeping(0, &["ab"]), &CancellationToken::new()).await.unwrap();

        let outcome = report.outcome(&LinkId::new("ab")).unwrap();
        assert_eq!(outcome.state, DispatchState::RolledBack);
        assert_eq!(outcome.final_link_state, LinkState::Active);
        assert_eq!(model.snapshot().link(&LinkId::new("ab")).unwrap().state, LinkState::Active);
        assert_eq!(report.count_in(DispatchState::Confirmed), 3);
        assert!(report.connectivity_ok);
        assert!(logs_contain("link action failed, rolling back"));
    }

    #[tokio::test]
    async fn test_cancelled_batch_sends_nothing() {
        let (model, writer) = ring();
        let plane = EmulatedControlPlane::from_topology(&model.snapshot());
        let dispatcher = CommandDispatcher::new(Arc::new(plane.clone()), fast_config());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = dispatcher.dispatch(&writer, &decision_sleeping(0, &["ab"]), &cancel).await.unwrap();

        assert!(report.cancelled);
        assert_eq!(report.outcome(&LinkId::new("ab")).unwrap().state, DispatchState::RolledBack);
        assert_eq!(plane.total_applied(), 0);
        assert_eq!(model.snapshot().count_in_state(LinkState::Sleeping), 0);
    }

    #[test]
    fn test_illegal_transition_is_ignored() {
        let mut outcome = LinkOutcome::new(0, LinkId::new("ab"), TargetState::Sleeping, LinkState::Active);
        outcome.transition(DispatchState::RolledBack);
        assert_eq!(outcome.state, DispatchState::Pending);
        assert!(outcome.transitions.is_empty());
    }
}
