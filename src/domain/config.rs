use std::time::Duration;

use crate::api::config_dto::EngineConfigDto;
use crate::error::Error;

/// Validated engine configuration. Built from [`EngineConfigDto`]; any invalid value is a fatal
/// `ConfigError` raised before the first slot runs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Utilization ratio (predicted load / rated capacity) below which a link may sleep.
    pub sleep_threshold: f64,
    /// Headroom, as a fraction of a sleeping link's capacity, its alternate path must keep free.
    pub min_active_margin: f64,
    pub active_power_w: f64,
    pub standby_power_w: f64,
    pub max_forecast_age_s: i64,
    pub slot_width_s: i64,
    pub slot_interval: Duration,
    pub horizon: usize,
    pub dispatch: DispatchConfig,
    pub export_every_slots: u64,
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub action_timeout: Duration,
    pub confirm_timeout: Duration,
    pub confirm_poll: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchConfig::from(&EngineConfigDto::default())
    }
}

impl From<&EngineConfigDto> for DispatchConfig {
    fn from(dto: &EngineConfigDto) -> Self {
        DispatchConfig {
            action_timeout: Duration::from_millis(dto.action_timeout_ms),
            confirm_timeout: Duration::from_millis(dto.confirm_timeout_ms),
            confirm_poll: Duration::from_millis(dto.confirm_poll_ms),
            max_retries: dto.max_retries,
            backoff_base: Duration::from_millis(dto.backoff_base_ms),
        }
    }
}

impl DispatchConfig {
    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base.saturating_mul(factor)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig::from_dto_unchecked(EngineConfigDto::default())
    }
}

impl EngineConfig {
    fn from_dto_unchecked(dto: EngineConfigDto) -> Self {
        EngineConfig {
            sleep_threshold: dto.sleep_threshold,
            min_active_margin: dto.min_active_margin,
            active_power_w: dto.active_power_w,
            standby_power_w: dto.standby_power_w,
            max_forecast_age_s: dto.max_forecast_age_s,
            slot_width_s: dto.slot_width_s,
            slot_interval: Duration::from_millis(dto.slot_interval_ms),
            horizon: dto.horizon,
            dispatch: DispatchConfig::from(&dto),
            export_every_slots: dto.export_every_slots,
        }
    }
}

impl TryFrom<EngineConfigDto> for EngineConfig {
    type Error = Error;

    fn try_from(dto: EngineConfigDto) -> Result<Self, Self::Error> {
        if !(dto.sleep_threshold > 0.0 && dto.sleep_threshold <= 1.0) {
            return Err(Error::ConfigError(format!("sleepThreshold must be in (0, 1], got {}", dto.sleep_threshold)));
        }

        if !dto.min_active_margin.is_finite() || dto.min_active_margin < 0.0 {
            return Err(Error::ConfigError(format!("minActiveMargin must be a non-negative number, got {}", dto.min_active_margin)));
        }

        if !dto.active_power_w.is_finite() || !dto.standby_power_w.is_finite() || dto.standby_power_w < 0.0 {
            return Err(Error::ConfigError("power constants must be finite and non-negative".to_string()));
        }

        if dto.standby_power_w > dto.active_power_w {
            return Err(Error::ConfigError(format!(
                "standbyPowerW ({}) must not exceed activePowerW ({})",
                dto.standby_power_w, dto.active_power_w
            )));
        }

        if dto.slot_width_s <= 0 || dto.max_forecast_age_s < 0 {
            return Err(Error::ConfigError("slotWidthS must be positive and maxForecastAgeS non-negative".to_string()));
        }

        // Forecasts are fetched one slot ahead, so a fresh one is a full slot old when it is used.
        if dto.max_forecast_age_s < dto.slot_width_s {
            return Err(Error::ConfigError(format!(
                "maxForecastAgeS ({}) must be at least slotWidthS ({})",
                dto.max_forecast_age_s, dto.slot_width_s
            )));
        }

        if dto.horizon == 0 {
            return Err(Error::ConfigError("horizon must cover at least one slot".to_string()));
        }

        if dto.action_timeout_ms == 0 || dto.confirm_timeout_ms == 0 || dto.confirm_poll_ms == 0 {
            return Err(Error::ConfigError("dispatch timeouts and poll period must be positive".to_string()));
        }

        Ok(EngineConfig::from_dto_unchecked(dto))
    }
}
