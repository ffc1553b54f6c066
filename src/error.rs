use thiserror::Error;

use crate::domain::utils::id::LinkId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("File not found or could not be read: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse JSON: {0}")]
    DeserializationError(#[from] serde_json::Error),

    #[error("Failed to read or write CSV: {0}")]
    CsvError(#[from] csv::Error),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Bad topology or engine configuration. Fatal at startup.
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("No usable forecast for link {link_id} in slot {slot}: {reason}")]
    ForecastUnavailable { link_id: LinkId, slot: u64, reason: String },

    /// The predictor could not be queried at all for a slot.
    #[error("Forecast source failed: {0}")]
    ForecastSourceError(String),

    #[error("Unknown link: {0}")]
    UnknownLinkError(LinkId),

    #[error("Control plane did not confirm link {link_id} within {timeout_ms} ms")]
    DispatchTimeout { link_id: LinkId, timeout_ms: u64 },

    #[error("Control plane rejected action for link {link_id}: {reason}")]
    DispatchRejected { link_id: LinkId, reason: String },

    #[error("Connectivity violation detected in slot {slot}: {detail}")]
    ConnectivityViolationDetected { slot: u64, detail: String },

    #[error("Dispatch of link {0} was cancelled")]
    DispatchCancelled(LinkId),
}

/// Errors reported by a control-plane adapter for a single action or status query.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ControlPlaneError {
    /// Worth retrying (timeouts, 5xx responses, controller busy).
    #[error("transient control plane error: {0}")]
    Transient(String),

    /// The controller refused the action (e.g. unknown port). Retrying will not help.
    #[error("action rejected by control plane: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for ControlPlaneError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| s.is_server_error()) {
            ControlPlaneError::Transient(e.to_string())
        } else {
            ControlPlaneError::Rejected(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
