//! Desired infrastructure specification.

use std::net::{IpAddr, Ipv4Addr};

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use crate::error::{EnsureError, Result};
use crate::remote::Tag;

/// Tag scope carrying the owner (landscape) id.
pub const SCOPE_OWNER: &str = "mvirt-infra/owner";
/// Tag scope carrying the cluster name.
pub const SCOPE_CLUSTER: &str = "mvirt-infra/cluster";
/// Tag scope marking manager API objects as ours.
pub const SCOPE_MANAGED_BY: &str = "mvirt-infra/managed-by";
pub const MANAGED_BY: &str = "mvirt-infra";

pub const DEFAULT_DHCP_LEASE_TIME: u32 = 7200;

/// Longest workers network prefix leaving room for gateway, DHCP server and a range.
const MAX_PREFIX_LEN: u8 = 28;
/// Offset of the first address handed out by DHCP.
const DHCP_RANGE_OFFSET: u32 = 10;

fn default_lease_time() -> u32 {
    DEFAULT_DHCP_LEASE_TIME
}

/// Desired topology for one cluster. Never mutated by the ensurer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfraSpec {
    pub edge_cluster_name: String,
    pub transport_zone_name: String,
    pub tier0_gateway_name: String,
    pub snat_ip_pool_name: String,
    pub owner_id: String,
    pub owner_name: String,
    pub cluster_name: String,
    pub workers_network: Ipv4Net,
    #[serde(default)]
    pub dns_servers: Vec<IpAddr>,
    #[serde(default = "default_lease_time")]
    pub dhcp_lease_time: u32,
}

impl InfraSpec {
    /// Display name of every object created for this cluster.
    pub fn full_cluster_name(&self) -> String {
        format!("{}--{}", self.owner_name, self.cluster_name)
    }

    /// Tags for policy objects, used by per-task recovery.
    pub fn create_tags(&self) -> Vec<Tag> {
        vec![
            Tag::new(SCOPE_OWNER, &self.owner_id),
            Tag::new(SCOPE_CLUSTER, &self.cluster_name),
        ]
    }

    /// Tags for manager API objects, used by the shared tag search.
    pub fn create_common_tags(&self) -> Vec<Tag> {
        let mut tags = self.create_tags();
        tags.push(Tag::new(SCOPE_MANAGED_BY, MANAGED_BY));
        tags
    }

    pub fn validate(&self) -> Result<()> {
        let names = [
            ("edge_cluster_name", &self.edge_cluster_name),
            ("transport_zone_name", &self.transport_zone_name),
            ("tier0_gateway_name", &self.tier0_gateway_name),
            ("snat_ip_pool_name", &self.snat_ip_pool_name),
            ("owner_id", &self.owner_id),
            ("owner_name", &self.owner_name),
            ("cluster_name", &self.cluster_name),
        ];
        for (field, value) in names {
            if value.trim().is_empty() {
                return Err(EnsureError::InvalidSpec(format!("{} is required", field)));
            }
        }

        if self.workers_network.prefix_len() > MAX_PREFIX_LEN {
            return Err(EnsureError::InvalidSpec(format!(
                "workers network {} is too small (max prefix /{})",
                self.workers_network, MAX_PREFIX_LEN
            )));
        }

        if let Some(dns) = self.dns_servers.iter().find(|ip| !ip.is_ipv4()) {
            return Err(EnsureError::InvalidSpec(format!(
                "DNS server {} is not an IPv4 address",
                dns
            )));
        }

        if self.dhcp_lease_time == 0 {
            return Err(EnsureError::InvalidSpec(
                "dhcp_lease_time must be positive".to_string(),
            ));
        }

        Ok(())
    }

    fn host(&self, offset: u32) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.workers_network.network()) + offset)
    }

    /// First host of the workers network.
    pub fn gateway_address(&self) -> Ipv4Addr {
        self.host(1)
    }

    /// Gateway address in CIDR notation, as configured on the segment.
    pub fn gateway_cidr(&self) -> String {
        format!(
            "{}/{}",
            self.gateway_address(),
            self.workers_network.prefix_len()
        )
    }

    pub fn dhcp_server_address(&self) -> Ipv4Addr {
        self.host(2)
    }

    pub fn dhcp_server_cidr(&self) -> String {
        format!(
            "{}/{}",
            self.dhcp_server_address(),
            self.workers_network.prefix_len()
        )
    }

    /// First and last address handed out by DHCP.
    pub fn dhcp_range(&self) -> (Ipv4Addr, Ipv4Addr) {
        let last = Ipv4Addr::from(u32::from(self.workers_network.broadcast()) - 1);
        (self.host(DHCP_RANGE_OFFSET), last)
    }

    pub fn dns_server_strings(&self) -> Vec<String> {
        self.dns_servers.iter().map(|ip| ip.to_string()).collect()
    }
}

/// Spec shared by unit tests.
#[cfg(test)]
pub(crate) fn test_spec() -> InfraSpec {
    serde_json::from_value(serde_json::json!({
        "edge_cluster_name": "edge-1",
        "transport_zone_name": "tz-overlay",
        "tier0_gateway_name": "t0",
        "snat_ip_pool_name": "snat-pool",
        "owner_id": "landscape-1",
        "owner_name": "dev",
        "cluster_name": "shoot-a",
        "workers_network": "10.250.0.0/24",
        "dns_servers": ["8.8.8.8"]
    }))
    .unwrap()
}
