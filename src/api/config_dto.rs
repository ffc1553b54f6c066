use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfigDto {
    pub sleep_threshold: f64,
    pub min_active_margin: f64,
    pub active_power_w: f64,
    pub standby_power_w: f64,
    pub max_forecast_age_s: i64,
    pub slot_width_s: i64,
    pub slot_interval_ms: u64,
    pub horizon: usize,
    pub action_timeout_ms: u64,
    pub confirm_timeout_ms: u64,
    pub confirm_poll_ms: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub export_every_slots: u64,
}

impl Default for EngineConfigDto {
    fn default() -> Self {
        EngineConfigDto {
            sleep_threshold: 0.10,
            min_active_margin: 0.10,
            active_power_w: 100.0,
            standby_power_w: 10.0,
            max_forecast_age_s: 7200,
            slot_width_s: 3600,
            slot_interval_ms: 10_000,
            horizon: 24,
            action_timeout_ms: 2000,
            confirm_timeout_ms: 5000,
            confirm_poll_ms: 100,
            max_retries: 3,
            backoff_base_ms: 200,
            export_every_slots: 6,
        }
    }
}
