use std::path::Path;

use crate::domain::config::EngineConfig;
use crate::domain::topology::network_topology::NetworkTopology;
use crate::error::Result;
use crate::loader::parser::{load_config_file, load_topology_file};

pub mod api;
pub mod domain;
pub mod error;
pub mod loader;
pub mod logger;

/// Loads and validates the topology and (optionally) the engine configuration. Without a configuration file
/// the built-in defaults are used.
pub fn load_network<P: AsRef<Path>>(topology_path: P, config_path: Option<P>) -> Result<(NetworkTopology, EngineConfig)> {
    let topology = load_topology_file(&topology_path)?;
    log::info!(
        "Topology '{}' loaded: {} nodes, {} links.",
        topology_path.as_ref().display(),
        topology.node_count(),
        topology.link_count()
    );

    let config = match config_path {
        Some(path) => {
            let config = load_config_file(&path)?;
            log::info!("Engine configuration loaded from '{}'.", path.as_ref().display());
            config
        }
        None => {
            log::info!("No engine configuration given; using defaults.");
            EngineConfig::default()
        }
    };

    Ok((topology, config))
}
