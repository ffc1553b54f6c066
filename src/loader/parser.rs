use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

use crate::api::config_dto::EngineConfigDto;
use crate::api::topology_dto::TopologyDto;
use crate::domain::config::EngineConfig;
use crate::domain::topology::network_topology::NetworkTopology;
use crate::error::{Error, Result};

/// Parses a JSON file into a given type `T`.
///
/// Errors are automatically converted into `crate::error::Error` variants:
/// - `Error::IoError` if the file cannot be read.
/// - `Error::DeserializationError` if the JSON is malformed.
pub fn parse_json_file<T: DeserializeOwned, P: AsRef<Path>>(file_path: P) -> Result<T> {
    let data = fs::read_to_string(file_path.as_ref())?;

    let parsed_data: T = serde_json::from_str(&data)?;

    Ok(parsed_data)
}

/// Reads and validates a topology description. Any problem, including an unreadable or malformed file, is
/// reported as `ConfigError` so startup fails before a slot is processed.
pub fn load_topology_file<P: AsRef<Path>>(file_path: P) -> Result<NetworkTopology> {
    let path = file_path.as_ref();
    let dto: TopologyDto =
        parse_json_file(path).map_err(|e| Error::ConfigError(format!("cannot load topology from '{}': {}", path.display(), e)))?;

    NetworkTopology::try_from(dto)
}

pub fn load_config_file<P: AsRef<Path>>(file_path: P) -> Result<EngineConfig> {
    let path = file_path.as_ref();
    let dto: EngineConfigDto =
        parse_json_file(path).map_err(|e| Error::ConfigError(format!("cannot load configuration from '{}': {}", path.display(), e)))?;

    EngineConfig::try_from(dto)
}
