use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologyDto {
    pub nodes: Vec<NodeDto>,
    pub links: Vec<LinkDto>,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDto {
    pub id: String,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkDto {
    pub id: String,
    pub source: String,
    pub target: String,
    /// Rated capacity, in the same unit the forecaster reports load in (Gbps for the reference backhaul).
    pub capacity: f64,
}
