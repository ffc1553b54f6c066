use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::domain::clock::clock::SharedClock;
use crate::domain::config::EngineConfig;
use crate::domain::decision::algorithm::DecisionEngine;
use crate::domain::decision::decision::SlotDecision;
use crate::domain::dispatch::control_plane::ControlPlane;
use crate::domain::dispatch::dispatcher::{CommandDispatcher, DispatchReport};
use crate::domain::forecast::forecast::{Forecast, ForecastSource};
use crate::domain::forecast::ingestion::ForecastIngestion;
use crate::domain::metrics::aggregator::{MetricsAggregator, MetricsTotals, PerformanceMonitor};
use crate::domain::metrics::metrics_log::{EnergyMetricsRecord, MetricsLog};
use crate::domain::metrics::power_model::PowerModel;
use crate::domain::plan::sleep_plan::SleepPlan;
use crate::domain::topology::link::LinkState;
use crate::domain::topology::network_topology::NetworkTopology;
use crate::domain::topology::state_model::{TopologyStateModel, TopologyWriter};
use crate::error::{Error, Result};

/// What happened in one processed slot.
#[derive(Debug, Clone)]
pub struct SlotSummary {
    pub slot: u64,
    pub fallback_forecasts: usize,
    pub decision: SlotDecision,
    pub report: DispatchReport,
    pub record: EnergyMetricsRecord,
}

/// The control loop: forecast, decide, dispatch, measure, once per slot.
///
/// Forecasts for the next slot are fetched by a background task while the current slot is dispatched. The
/// loop owns the only `TopologyWriter` and lends it to the dispatcher, so link state has a single writer.
#[derive(Debug)]
pub struct EnergyManager {
    config: EngineConfig,
    model: TopologyStateModel,
    writer: TopologyWriter,
    source: Arc<dyn ForecastSource>,
    ingestion: ForecastIngestion,
    engine: DecisionEngine,
    dispatcher: CommandDispatcher,
    metrics: MetricsAggregator,
    monitor: Option<Arc<dyn PerformanceMonitor>>,
    clock: SharedClock,
    plan: SleepPlan,
    completed_plans: Vec<SleepPlan>,
    plan_out: Option<PathBuf>,
}

impl EnergyManager {
    pub fn new(
        config: EngineConfig,
        topology: NetworkTopology,
        source: Arc<dyn ForecastSource>,
        control_plane: Arc<dyn ControlPlane>,
        clock: SharedClock,
    ) -> Self {
        let (model, writer) = TopologyStateModel::new(topology);
        let power = PowerModel::new(config.active_power_w, config.standby_power_w);

        EnergyManager {
            ingestion: ForecastIngestion::new(config.max_forecast_age_s, clock.clone()),
            engine: DecisionEngine::from_config(&config),
            dispatcher: CommandDispatcher::new(control_plane, config.dispatch.clone()),
            metrics: MetricsAggregator::new(power, config.slot_width_s, clock.clone(), None),
            plan: SleepPlan::new(config.horizon),
            completed_plans: Vec::new(),
            plan_out: None,
            monitor: None,
            config,
            model,
            writer,
            source,
            clock,
        }
    }

    pub fn with_plan_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.plan_out = Some(path.into());
        self
    }

    pub fn with_metrics_log(mut self, log: MetricsLog) -> Self {
        self.metrics.attach_log(log);
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn PerformanceMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Read handle on the live topology.
    pub fn model(&self) -> TopologyStateModel {
        self.model.clone()
    }

    pub fn plan(&self) -> &SleepPlan {
        &self.plan
    }

    pub fn completed_plans(&self) -> &[SleepPlan] {
        &self.completed_plans
    }

    pub fn metrics(&self) -> &MetricsAggregator {
        &self.metrics
    }

    /// Processes one slot from already-fetched forecasts.
    pub async fn run_slot(&mut self, slot: u64, fetched: Result<Vec<Forecast>>, cancel: &CancellationToken) -> Result<SlotSummary> {
        let forecasts = self.ingestion.ingest(slot, fetched, &self.model.snapshot());
        self.writer.record_predictions(&forecasts)?;

        let decision = self.engine.decide(&self.model.snapshot(), &forecasts);

        if self.plan.is_complete() {
            self.rotate_plan();
        }
        self.plan.push_slot(decision.clone())?;

        let report = self.dispatcher.dispatch(&self.writer, &decision, cancel).await?;
        if report.all_terminal() {
            self.plan.mark_confirmed(slot);
        }

        let observed = match &self.monitor {
            Some(monitor) => monitor.observe(slot).await,
            None => None,
        };

        let confirmed = self.model.snapshot();
        log_link_states(slot, &confirmed);
        let record = self.metrics.record(slot, &confirmed, &report, observed).clone();

        self.clock.advance_slot();

        Ok(SlotSummary { slot, fallback_forecasts: forecasts.fallback_count(), decision, report, record })
    }

    /// Runs slots `0..slots` (forever when `None`) until done or `cancel` fires, then exports the plan and
    /// closes the metrics log. A cancelled run still finishes (and rolls back) the slot in flight.
    pub async fn run(&mut self, slots: Option<u64>, cancel: CancellationToken) -> Result<MetricsTotals> {
        log::info!(
            "Energy manager started: {} links, threshold {}, margin {}, slot interval {:?}.",
            self.model.snapshot().link_count(),
            self.config.sleep_threshold,
            self.config.min_active_margin,
            self.config.slot_interval
        );

        let result = self.run_slots(slots, &cancel).await;

        self.shutdown();
        result.map(|_| self.metrics.totals())
    }

    /// At most one fetch is outstanding: the next slot's forecasts are requested when the current slot starts,
    /// so a forecast is never more than one slot old when it is ingested.
    async fn run_slots(&mut self, slots: Option<u64>, cancel: &CancellationToken) -> Result<()> {
        let mut slot: u64 = 0;
        let mut pending = slots.is_none_or(|n| n > 0).then(|| self.prefetch(0));

        while let Some(mut fetch) = pending.take() {
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                joined = &mut fetch => Some(joined),
            };
            let Some(joined) = joined else {
                fetch.abort();
                break;
            };
            let fetched = joined.unwrap_or_else(|e| Err(Error::ForecastSourceError(format!("forecast fetch for slot {} failed: {}", slot, e))));

            if slots.is_none_or(|n| slot + 1 < n) {
                pending = Some(self.prefetch(slot + 1));
            }

            if let Err(e) = self.run_slot(slot, fetched, cancel).await {
                if let Some(next) = pending.take() {
                    next.abort();
                }
                return Err(e);
            }
            slot += 1;

            if self.config.export_every_slots > 0 && slot % self.config.export_every_slots == 0 {
                self.export();
            }

            if cancel.is_cancelled() {
                break;
            }

            if pending.is_some() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = sleep(self.config.slot_interval) => {}
                }
            }
        }

        if let Some(next) = pending {
            next.abort();
        }
        if cancel.is_cancelled() {
            log::warn!("Energy manager cancelled after {} slots.", slot);
        }
        Ok(())
    }

    fn prefetch(&self, slot: u64) -> JoinHandle<Result<Vec<Forecast>>> {
        let source = self.source.clone();
        log::debug!("Prefetching forecasts for slot {}", slot);
        tokio::spawn(async move { source.fetch_slot(slot).await })
    }

    /// Writes the current plan and flushes the metrics log. Failures are logged; the loop keeps running.
    pub fn export(&self) {
        if let Some(path) = &self.plan_out {
            if let Err(e) = self.plan.save(path) {
                log::error!("Export of sleep plan to {} failed: {}", path.display(), e);
            }
        }
        self.metrics.flush();
    }

    fn rotate_plan(&mut self) {
        let finished = std::mem::replace(&mut self.plan, SleepPlan::new(self.config.horizon));

        if let Some(path) = &self.plan_out {
            let archived = archived_plan_path(path, &finished);
            if let Err(e) = finished.save(&archived) {
                log::error!("Archiving sleep plan to {} failed: {}", archived.display(), e);
            }
        }

        log::info!("Sleep plan {} complete after {} slots; starting plan {}.", finished.run_id, finished.len(), self.plan.run_id);
        self.completed_plans.push(finished);
    }

    fn shutdown(&mut self) {
        self.export();
        self.metrics.finish();
    }
}

fn archived_plan_path(path: &Path, plan: &SleepPlan) -> PathBuf {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("sleep_plan");
    path.with_file_name(format!("{}-{}.json", stem, plan.run_id))
}

fn log_link_states(slot: u64, topology: &NetworkTopology) {
    let names = |state: LinkState| topology.links_in_state(state).into_iter().map(String::from).collect::<Vec<_>>().join(", ");

    log::debug!("Slot {} ACTIVE: [{}]", slot, names(LinkState::Active));
    log::debug!("Slot {} SLEEPING: [{}]", slot, names(LinkState::Sleeping));
}
