use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use crate::api::forecast_dto::PredictionsResponseDto;
use crate::domain::clock::clock::SharedClock;
use crate::domain::forecast::forecast::{Forecast, ForecastSource};
use crate::domain::utils::id::LinkId;
use crate::error::{Error, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Client for the predictor service (`GET <base>/predictions/next_hour`).
///
/// The service reports utilization as a ratio of the link's capacity; it is converted to capacity units here.
/// The timestamp in the response names the predicted hour of the replayed dataset, not the moment the
/// prediction was made, so forecasts are stamped with the time they were received.
#[derive(Debug, Clone)]
pub struct HttpForecastSource {
    client: reqwest::Client,
    url: String,
    capacities: HashMap<LinkId, f64>,
    clock: SharedClock,
}

impl HttpForecastSource {
    pub fn new(base_url: &str, capacities: HashMap<LinkId, f64>, clock: SharedClock) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let url = format!("{}/predictions/next_hour", base_url.trim_end_matches('/'));

        Ok(HttpForecastSource { client, url, capacities, clock })
    }

    /// Converts the service response into forecasts. Entries without a ratio or for unknown links are skipped
    /// and end up as missing.
    pub fn convert(&self, slot: u64, dto: PredictionsResponseDto) -> Vec<Forecast> {
        let issued_at = self.clock.now_in_s();

        dto.predictions
            .into_iter()
            .filter_map(|prediction| {
                let link_id = LinkId::new(prediction.link_id);
                let capacity = self.capacities.get(&link_id)?;
                let ratio = prediction.utilization_ratio?;

                Some(Forecast { predicted_utilization: ratio * capacity, link_id, slot, issued_at })
            })
            .collect()
    }
}

#[async_trait]
impl ForecastSource for HttpForecastSource {
    async fn fetch_slot(&self, slot: u64) -> Result<Vec<Forecast>> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::ForecastSourceError(format!("predictor returned status {}: {}", status, body)));
        }

        let dto: PredictionsResponseDto = response.json().await?;
        log::debug!("Predictor answered for hour {:?} with {} predictions", dto.timestamp, dto.predictions.len());

        Ok(self.convert(slot, dto))
    }
}
