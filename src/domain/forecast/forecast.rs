use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::domain::topology::network_topology::NetworkTopology;
use crate::domain::utils::id::LinkId;
use crate::error::{Error, Result};

/// Predicted load of one link for one slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub link_id: LinkId,
    pub slot: u64,
    /// Predicted load in the link's capacity unit.
    pub predicted_utilization: f64,
    /// Unix timestamp (s) at which the prediction was produced or received; used for staleness checks.
    pub issued_at: i64,
}

/// Why a link's forecast was or was not used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastStatus {
    Fresh,
    Stale,
    Missing,
    Invalid,
}

impl fmt::Display for ForecastStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForecastStatus::Fresh => write!(f, "fresh"),
            ForecastStatus::Stale => write!(f, "stale"),
            ForecastStatus::Missing => write!(f, "missing"),
            ForecastStatus::Invalid => write!(f, "invalid"),
        }
    }
}

/// The forecast for one link in one slot, after validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastEntry {
    pub forecast: Option<Forecast>,
    pub status: ForecastStatus,
    /// Fail-safe value used whenever `status` is not `Fresh`: the link's rated capacity.
    pub fallback_utilization: f64,
}

impl ForecastEntry {
    pub fn effective_utilization(&self) -> f64 {
        match (&self.forecast, self.status) {
            (Some(forecast), ForecastStatus::Fresh) => forecast.predicted_utilization,
            _ => self.fallback_utilization,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.status != ForecastStatus::Fresh
    }
}

/// One validated forecast entry per topology link for a single slot.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastSet {
    pub slot: u64,
    entries: BTreeMap<LinkId, ForecastEntry>,
}

impl ForecastSet {
    pub fn new(slot: u64, entries: BTreeMap<LinkId, ForecastEntry>) -> Self {
        ForecastSet { slot, entries }
    }

    /// Every link falls back to the fail-safe value. Used when the source could not be reached at all.
    pub fn all_fallback(slot: u64, topology: &NetworkTopology) -> Self {
        let entries = topology
            .links()
            .map(|l| (l.id.clone(), ForecastEntry { forecast: None, status: ForecastStatus::Missing, fallback_utilization: l.capacity }))
            .collect();
        ForecastSet { slot, entries }
    }

    /// The usable forecast for `link_id`, or `ForecastUnavailable` when the link fell back.
    pub fn get_forecast(&self, link_id: &LinkId) -> Result<&Forecast> {
        let entry = self.entries.get(link_id).ok_or_else(|| Error::ForecastUnavailable {
            link_id: link_id.clone(),
            slot: self.slot,
            reason: "no entry for link".to_string(),
        })?;

        match (&entry.forecast, entry.status) {
            (Some(forecast), ForecastStatus::Fresh) => Ok(forecast),
            (_, status) => Err(Error::ForecastUnavailable { link_id: link_id.clone(), slot: self.slot, reason: status.to_string() }),
        }
    }

    pub fn entry(&self, link_id: &LinkId) -> Option<&ForecastEntry> {
        self.entries.get(link_id)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&LinkId, &ForecastEntry)> {
        self.entries.iter()
    }

    pub fn fallback_count(&self) -> usize {
        self.entries.values().filter(|e| e.is_fallback()).count()
    }
}

/// Anything able to produce next-slot predictions: the predictor service, a replayed dataset, a test stub.
#[async_trait]
pub trait ForecastSource: fmt::Debug + Send + Sync {
    /// All forecasts the source has for `slot`. Links absent from the result are treated as missing.
    async fn fetch_slot(&self, slot: u64) -> Result<Vec<Forecast>>;
}

pub fn capacities_of(topology: &NetworkTopology) -> HashMap<LinkId, f64> {
    topology.links().map(|l| (l.id.clone(), l.capacity)).collect()
}
