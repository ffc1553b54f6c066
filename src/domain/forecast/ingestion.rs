use std::collections::{BTreeMap, HashMap};

use crate::domain::clock::clock::SharedClock;
use crate::domain::forecast::forecast::{Forecast, ForecastEntry, ForecastSet, ForecastSource, ForecastStatus};
use crate::domain::topology::network_topology::NetworkTopology;
use crate::domain::utils::id::LinkId;
use crate::error::Result;

/// Validates raw forecasts and applies the fail-safe default.
///
/// Missing, stale and invalid forecasts are all handled the same way: the link is treated as if it were
/// predicted to run at its full rated capacity, which keeps it ACTIVE for that slot. The status marker is kept
/// so the audit trail shows which case applied.
#[derive(Debug, Clone)]
pub struct ForecastIngestion {
    max_age_s: i64,
    clock: SharedClock,
}

impl ForecastIngestion {
    pub fn new(max_age_s: i64, clock: SharedClock) -> Self {
        ForecastIngestion { max_age_s, clock }
    }

    /// Fetches once; a failed fetch is not retried and simply falls back for this slot.
    pub async fn fetch(&self, source: &dyn ForecastSource, slot: u64, topology: &NetworkTopology) -> ForecastSet {
        let fetched = source.fetch_slot(slot).await;
        self.ingest(slot, fetched, topology)
    }

    pub fn ingest(&self, slot: u64, fetched: Result<Vec<Forecast>>, topology: &NetworkTopology) -> ForecastSet {
        let forecasts = match fetched {
            Ok(forecasts) => forecasts,
            Err(e) => {
                log::error!("Forecast source unavailable for slot {}: {}. All {} links fall back to ACTIVE.", slot, e, topology.link_count());
                return ForecastSet::all_fallback(slot, topology);
            }
        };

        let received = forecasts.len();
        let mut latest: HashMap<LinkId, Forecast> = HashMap::new();

        for forecast in forecasts {
            if topology.link(&forecast.link_id).is_none() {
                log::debug!("Ignoring forecast for unknown link {}", forecast.link_id);
                continue;
            }

            match latest.get(&forecast.link_id) {
                Some(existing) if existing.issued_at >= forecast.issued_at => {}
                _ => {
                    latest.insert(forecast.link_id.clone(), forecast);
                }
            }
        }

        let now = self.clock.now_in_s();
        let mut entries: BTreeMap<LinkId, ForecastEntry> = BTreeMap::new();

        for link in topology.links() {
            let forecast = latest.remove(&link.id);
            let status = match &forecast {
                None => ForecastStatus::Missing,
                Some(f) => self.classify(f, slot, now),
            };

            if status != ForecastStatus::Fresh {
                log::warn!("Forecast for link {} in slot {} is {}; assuming full utilization ({}).", link.id, slot, status, link.capacity);
            }

            entries.insert(link.id.clone(), ForecastEntry { forecast, status, fallback_utilization: link.capacity });
        }

        let set = ForecastSet::new(slot, entries);
        log::info!("Received {} predictions for slot {}; {} links use the fail-safe default.", received, slot, set.fallback_count());
        set
    }

    fn classify(&self, forecast: &Forecast, slot: u64, now: i64) -> ForecastStatus {
        if forecast.slot != slot || !forecast.predicted_utilization.is_finite() || forecast.predicted_utilization < 0.0 {
            return ForecastStatus::Invalid;
        }

        if now - forecast.issued_at > self.max_age_s {
            return ForecastStatus::Stale;
        }

        ForecastStatus::Fresh
    }
}
