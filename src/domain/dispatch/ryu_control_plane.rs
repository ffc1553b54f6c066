use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use crate::api::controller_dto::{ControllerTopologyDto, PortDescDto, PortModifyDto};
use crate::api::topology_dto::{LinkDto, NodeDto, TopologyDto};
use crate::domain::dispatch::control_plane::{ControlPlane, PortAction, PortStatus};
use crate::domain::utils::id::LinkId;
use crate::error::{ControlPlaneError, Error, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// OpenFlow `OFPPC_PORT_DOWN` config bit.
const OFPPC_PORT_DOWN: u32 = 1;
/// OpenFlow `OFPPS_LINK_DOWN` state bit.
const OFPPS_LINK_DOWN: u32 = 1;

/// Switch port that carries a link. Actions are applied on the switch side of host links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRef {
    pub dpid: u64,
    pub port_no: u32,
}

/// Control plane backed by a Ryu controller's REST API.
#[derive(Debug, Clone)]
pub struct RyuControlPlane {
    client: reqwest::Client,
    base_url: String,
    ports: HashMap<LinkId, PortRef>,
}

impl RyuControlPlane {
    pub fn new(base_url: &str, ports: HashMap<LinkId, PortRef>) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(RyuControlPlane { client, base_url: base_url.trim_end_matches('/').to_string(), ports })
    }

    /// Fetches `GET /topology` from the controller.
    pub async fn fetch_topology(base_url: &str) -> Result<ControllerTopologyDto> {
        let url = format!("{}/topology", base_url.trim_end_matches('/'));
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let response = client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(Error::ConfigError(format!("controller topology request to {} returned {}", url, response.status())));
        }

        let dto: ControllerTopologyDto = response.json().await?;
        log::info!("Controller reported {} links ({} declared)", dto.topology.len(), dto.total_links);
        Ok(dto)
    }

    /// Connects to the controller and maps every reported link to its switch port.
    pub async fn discover(base_url: &str) -> Result<(Self, ControllerTopologyDto)> {
        let dto = Self::fetch_topology(base_url).await?;
        let plane = Self::new(base_url, port_map(&dto))?;
        Ok((plane, dto))
    }

    pub fn port_of(&self, link_id: &LinkId) -> Option<PortRef> {
        self.ports.get(link_id).copied()
    }

    fn port(&self, link_id: &LinkId) -> std::result::Result<PortRef, ControlPlaneError> {
        self.port_of(link_id).ok_or_else(|| ControlPlaneError::Rejected(format!("no switch port known for link {}", link_id)))
    }
}

fn node_name(dpid: i64) -> String {
    if dpid < 0 { format!("h{}", -dpid) } else { format!("s{}", dpid) }
}

/// Switch-side port of every link. Links between two hosts have no switch port and are skipped.
pub fn port_map(dto: &ControllerTopologyDto) -> HashMap<LinkId, PortRef> {
    dto.topology
        .iter()
        .filter_map(|(link_id, (dpid_a, port_a, _, dpid_b, port_b, _))| {
            let (dpid, port_no) = if *dpid_a > 0 {
                (*dpid_a, *port_a)
            } else if *dpid_b > 0 {
                (*dpid_b, *port_b)
            } else {
                log::warn!("Link {} joins two hosts; it cannot be switched", link_id);
                return None;
            };
            Some((LinkId::new(link_id.clone()), PortRef { dpid: dpid as u64, port_no }))
        })
        .collect()
}

/// Builds a topology description from the controller's link map. The controller does not report
/// bandwidth, so `capacity_of(dpid_a, dpid_b)` assigns each link its rated capacity.
pub fn topology_from_controller(dto: &ControllerTopologyDto, capacity_of: impl Fn(i64, i64) -> f64) -> TopologyDto {
    let mut nodes: BTreeSet<String> = BTreeSet::new();
    let mut links: Vec<LinkDto> = Vec::with_capacity(dto.topology.len());

    for (link_id, (dpid_a, _, _, dpid_b, _, _)) in &dto.topology {
        let source = node_name(*dpid_a);
        let target = node_name(*dpid_b);
        nodes.insert(source.clone());
        nodes.insert(target.clone());
        links.push(LinkDto { id: link_id.clone(), source, target, capacity: capacity_of(*dpid_a, *dpid_b) });
    }

    TopologyDto { nodes: nodes.into_iter().map(|id| NodeDto { id }).collect(), links }
}

/// Rated capacities of the reference three-tier backhaul: switches 1-3 form the core.
pub fn reference_backhaul_capacity(dpid_a: i64, dpid_b: i64) -> f64 {
    let is_core = |dpid: i64| (1..=3).contains(&dpid);

    if dpid_a < 0 || dpid_b < 0 {
        5.0
    } else if is_core(dpid_a) && is_core(dpid_b) {
        50.0
    } else {
        20.0
    }
}

fn port_no_matches(value: &serde_json::Value, port_no: u32) -> bool {
    match value {
        serde_json::Value::Number(n) => n.as_u64() == Some(port_no as u64),
        serde_json::Value::String(s) => s.parse::<u32>().ok() == Some(port_no),
        _ => false,
    }
}

fn status_error(status: reqwest::StatusCode, body: String) -> ControlPlaneError {
    if status.is_server_error() {
        ControlPlaneError::Transient(format!("controller returned {}: {}", status, body))
    } else {
        ControlPlaneError::Rejected(format!("controller returned {}: {}", status, body))
    }
}

#[async_trait]
impl ControlPlane for RyuControlPlane {
    async fn apply(&self, link_id: &LinkId, action: PortAction) -> std::result::Result<(), ControlPlaneError> {
        let port = self.port(link_id)?;
        let body = PortModifyDto {
            dpid: port.dpid,
            port_no: port.port_no,
            config: if action.expects_admin_up() { 0 } else { OFPPC_PORT_DOWN },
            mask: OFPPC_PORT_DOWN,
        };

        let response = self.client.post(format!("{}/stats/portdesc/modify", self.base_url)).json(&body).send().await?;
        let status = response.status();

        if status.is_success() {
            log::debug!("{} sent for {} (s{} port {})", action, link_id, port.dpid, port.port_no);
            Ok(())
        } else {
            Err(status_error(status, response.text().await.unwrap_or_default()))
        }
    }

    async fn query_status(&self, link_id: &LinkId) -> std::result::Result<PortStatus, ControlPlaneError> {
        let port = self.port(link_id)?;
        let response = self.client.get(format!("{}/stats/portdesc/{}", self.base_url, port.dpid)).send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(status_error(status, response.text().await.unwrap_or_default()));
        }

        let body: HashMap<String, Vec<PortDescDto>> = response.json().await?;
        let desc = body
            .values()
            .flatten()
            .find(|desc| port_no_matches(&desc.port_no, port.port_no))
            .ok_or_else(|| ControlPlaneError::Rejected(format!("switch s{} does not report port {}", port.dpid, port.port_no)))?;

        Ok(PortStatus { admin_up: desc.config & OFPPC_PORT_DOWN == 0, oper_up: desc.state & OFPPS_LINK_DOWN == 0, utilization: None })
    }
}
