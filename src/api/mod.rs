pub mod config_dto;
pub mod controller_dto;
pub mod forecast_dto;
pub mod topology_dto;
