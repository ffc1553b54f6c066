pub mod aggregator;
pub mod metrics_log;
pub mod power_model;
