use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `(dpid_a, port_a, hw_addr_a, dpid_b, port_b, hw_addr_b)`. A negative dpid names a host: `-3` is `h3`.
pub type LinkTupleDto = (i64, u32, String, i64, u32, String);

/// Response of the controller's `GET /topology`.
#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct ControllerTopologyDto {
    pub topology: BTreeMap<String, LinkTupleDto>,
    #[serde(default)]
    pub total_links: usize,
}

/// Body of `POST /stats/portdesc/modify`.
#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct PortModifyDto {
    pub dpid: u64,
    pub port_no: u32,
    pub config: u32,
    pub mask: u32,
}

/// One entry of `GET /stats/portdesc/<dpid>`, which answers `{ "<dpid>": [PortDescDto, ...] }`.
#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct PortDescDto {
    pub port_no: serde_json::Value,
    #[serde(default)]
    pub config: u32,
    #[serde(default)]
    pub state: u32,
}
