use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::Debug;

use crate::domain::clock::clock::SharedClock;
use crate::domain::dispatch::dispatcher::{DispatchReport, DispatchState};
use crate::domain::metrics::metrics_log::{EnergyMetricsRecord, MetricsLog};
use crate::domain::metrics::power_model::PowerModel;
use crate::domain::topology::network_topology::NetworkTopology;

/// Tracing target of machine-readable events (per-slot metrics, dispatch transitions).
pub const ANALYTICS_TARGET: &str = "analytics";

/// Throughput and latency measured by an external harness for one slot.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ObservedPerformance {
    pub throughput_mbps: Option<f64>,
    pub latency_ms: Option<f64>,
}

/// Source of observed network performance, e.g. an iperf/ping harness running next to the emulator.
#[async_trait]
pub trait PerformanceMonitor: Debug + Send + Sync {
    async fn observe(&self, slot: u64) -> Option<ObservedPerformance>;
}

/// Running totals across all slots recorded so far.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MetricsTotals {
    pub slots: u64,
    pub energy_wh: f64,
    pub baseline_energy_wh: f64,
    pub dispatched_actions: usize,
    pub rolled_back_actions: usize,
    pub state_transitions: usize,
    pub connectivity_violations: usize,
}

impl MetricsTotals {
    /// Fraction of the all-active energy that was saved.
    pub fn savings_ratio(&self) -> f64 {
        if self.baseline_energy_wh <= 0.0 { 0.0 } else { 1.0 - self.energy_wh / self.baseline_energy_wh }
    }
}

/// Turns each slot's confirmed topology and dispatch report into an `EnergyMetricsRecord`.
#[derive(Debug)]
pub struct MetricsAggregator {
    power: PowerModel,
    slot_width_s: i64,
    clock: SharedClock,
    records: Vec<EnergyMetricsRecord>,
    totals: MetricsTotals,
    log: Option<MetricsLog>,
}

impl MetricsAggregator {
    pub fn new(power: PowerModel, slot_width_s: i64, clock: SharedClock, log: Option<MetricsLog>) -> Self {
        MetricsAggregator { power, slot_width_s, clock, records: Vec::new(), totals: MetricsTotals::default(), log }
    }

    /// `snapshot` must be taken after the slot's dispatch finished, so it reflects confirmed states only.
    pub fn record(
        &mut self,
        slot: u64,
        snapshot: &NetworkTopology,
        report: &DispatchReport,
        observed: Option<ObservedPerformance>,
    ) -> &EnergyMetricsRecord {
        let (active_links, sleeping_links) = PowerModel::link_counts(snapshot);
        let estimated_power_w = self.power.estimate(active_links, sleeping_links);
        let observed = observed.unwrap_or_default();
        let timestamp = DateTime::<Utc>::from_timestamp(self.clock.now_in_s(), 0).map(|t| t.to_rfc3339()).unwrap_or_default();

        let record = EnergyMetricsRecord {
            slot,
            timestamp,
            active_links,
            sleeping_links,
            estimated_power_w,
            observed_throughput_mbps: observed.throughput_mbps,
            observed_latency_ms: observed.latency_ms,
            dispatched_actions: report.dispatched_actions(),
            confirmed_actions: report.confirmed_actions(),
            rolled_back_actions: report.count_in(DispatchState::RolledBack),
            state_transitions: report.transition_count(),
            connectivity_ok: report.connectivity_ok,
        };

        let hours = self.slot_width_s as f64 / 3600.0;
        self.totals.slots += 1;
        self.totals.energy_wh += estimated_power_w * hours;
        self.totals.baseline_energy_wh += self.power.estimate(snapshot.link_count(), 0) * hours;
        self.totals.dispatched_actions += record.dispatched_actions;
        self.totals.rolled_back_actions += record.rolled_back_actions;
        self.totals.state_transitions += record.state_transitions;
        if report.violation.is_some() {
            self.totals.connectivity_violations += 1;
        }

        tracing::info!(
            target: ANALYTICS_TARGET,
            slot,
            active_links,
            sleeping_links,
            estimated_power_w,
            throughput_mbps = ?record.observed_throughput_mbps,
            latency_ms = ?record.observed_latency_ms,
            rolled_back = record.rolled_back_actions,
            connectivity_ok = record.connectivity_ok,
            "slot metrics"
        );
        log::info!(
            "Slot {} metrics: {:.0} W, {}/{} links active, {} sleeping.",
            slot,
            estimated_power_w,
            active_links,
            snapshot.link_count(),
            sleeping_links
        );

        if let Some(log) = &self.log {
            log.append(record.clone());
        }

        self.records.push(record);
        &self.records[self.records.len() - 1]
    }

    pub fn attach_log(&mut self, log: MetricsLog) {
        self.log = Some(log);
    }

    pub fn records(&self) -> &[EnergyMetricsRecord] {
        &self.records
    }

    pub fn totals(&self) -> MetricsTotals {
        self.totals
    }

    pub fn power_model(&self) -> PowerModel {
        self.power
    }

    pub fn flush(&self) {
        if let Some(log) = &self.log {
            log.flush();
        }
    }

    /// Writes outstanding rows and stops the CSV writer.
    pub fn finish(&mut self) {
        if let Some(log) = self.log.as_mut() {
            log.shutdown();
        }

        log::info!(
            "Energy summary: {} slots, {:.1} Wh used against {:.1} Wh all-active ({:.1}% saved), {} actions, {} rolled back.",
            self.totals.slots,
            self.totals.energy_wh,
            self.totals.baseline_energy_wh,
            self.totals.savings_ratio() * 100.0,
            self.totals.dispatched_actions,
            self.totals.rolled_back_actions
        );
    }
}
