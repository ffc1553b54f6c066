pub mod csv_source;
pub mod forecast;
pub mod forecast_mock;
pub mod http_source;
pub mod ingestion;
