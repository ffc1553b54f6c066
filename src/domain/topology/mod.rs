pub mod link;
pub mod network_topology;
pub mod state_model;
