use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::domain::forecast::forecast::{Forecast, ForecastSource};
use crate::domain::utils::id::LinkId;
use crate::error::{Error, Result};

/// In-memory forecast source. Slots without data, or marked unavailable, fail like an unreachable predictor.
#[derive(Debug, Clone, Default)]
pub struct StaticForecastSource {
    slots: Arc<RwLock<HashMap<u64, Vec<Forecast>>>>,
    unavailable: Arc<RwLock<HashSet<u64>>>,
}

impl StaticForecastSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `(link, predicted load)` pairs for `slot`, issued at `issued_at`.
    pub fn set_slot(&self, slot: u64, issued_at: i64, loads: &[(&str, f64)]) {
        let forecasts = loads
            .iter()
            .map(|(link, load)| Forecast { link_id: LinkId::new(*link), slot, predicted_utilization: *load, issued_at })
            .collect();

        if let Ok(mut slots) = self.slots.write() {
            slots.insert(slot, forecasts);
        }
    }

    pub fn push(&self, forecast: Forecast) {
        if let Ok(mut slots) = self.slots.write() {
            slots.entry(forecast.slot).or_default().push(forecast);
        }
    }

    pub fn set_unavailable(&self, slot: u64) {
        if let Ok(mut unavailable) = self.unavailable.write() {
            unavailable.insert(slot);
        }
    }
}

#[async_trait]
impl ForecastSource for StaticForecastSource {
    async fn fetch_slot(&self, slot: u64) -> Result<Vec<Forecast>> {
        let unavailable = self.unavailable.read().map(|u| u.contains(&slot)).unwrap_or(true);
        if unavailable {
            return Err(Error::ForecastSourceError(format!("predictor marked unavailable for slot {}", slot)));
        }

        let slots = self.slots.read().map_err(|_| Error::ForecastSourceError("forecast store poisoned".to_string()))?;
        Ok(slots.get(&slot).cloned().unwrap_or_default())
    }
}
