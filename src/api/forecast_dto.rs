use serde::{Deserialize, Serialize};

/// Response of the predictor service's `GET /predictions/next_hour`.
#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct PredictionsResponseDto {
    /// Timestamp of the predicted hour, e.g. `2024-01-01 05:00:00`. `null` when the service has no data.
    pub timestamp: Option<String>,
    #[serde(default)]
    pub predictions: Vec<PredictionDto>,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct PredictionDto {
    pub link_id: String,
    #[serde(rename = "bandwidth_utilization (ratio)")]
    pub utilization_ratio: Option<f64>,
}

/// One row of a replayable traffic dataset.
#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct TrafficRecordDto {
    pub timestamp: String,
    pub link_id: String,
    #[serde(rename = "bandwidth_utilization (ratio)")]
    pub utilization_ratio: f64,
}
