//! Shared fixture for mvirt-infra integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use mvirt_infra::remote::memory::MemoryControlPlane;
use mvirt_infra::{InfraEnsurer, InfraSpec};

/// Objects the default task list creates for one cluster.
pub const CREATED_PER_CLUSTER: usize = 9;

pub fn spec() -> InfraSpec {
    serde_json::from_value(serde_json::json!({
        "edge_cluster_name": "edge-1",
        "transport_zone_name": "tz-overlay",
        "tier0_gateway_name": "t0",
        "snat_ip_pool_name": "snat-pool",
        "owner_id": "landscape-1",
        "owner_name": "dev",
        "cluster_name": "shoot-a",
        "workers_network": "10.250.0.0/24",
        "dns_servers": ["8.8.8.8", "8.8.4.4"]
    }))
    .unwrap()
}

/// In-memory control plane with the looked-up objects of [`spec`] in place.
pub struct Fixture {
    pub spec: InfraSpec,
    pub plane: Arc<MemoryControlPlane>,
}

impl Fixture {
    pub fn new() -> Self {
        let spec = spec();
        let plane = Arc::new(MemoryControlPlane::with_lookups(&spec));
        Self { spec, plane }
    }

    pub fn ensurer(&self) -> InfraEnsurer {
        InfraEnsurer::new(self.plane.clone(), self.plane.clone())
    }
}
