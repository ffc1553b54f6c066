pub mod clock;
pub mod config;
pub mod decision;
pub mod dispatch;
pub mod energy_manager;
pub mod forecast;
pub mod metrics;
pub mod plan;
pub mod topology;
pub mod utils;
