//! Persisted infrastructure state: one optional reference per task slot.

use std::fmt;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::remote::RemoteObject;

/// State file errors.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("state file I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("state file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Pointer to a remote object created or looked up by a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Reference {
    pub fn new(id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path: Some(path.into()),
        }
    }

    pub fn from_object(object: &RemoteObject) -> Self {
        Self {
            id: object.id.clone(),
            path: object.path.clone(),
        }
    }
}

/// Logical position of a task in the state record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Tier0Gateway,
    TransportZone,
    EdgeCluster,
    SnatIpPool,
    Tier1Gateway,
    LocaleService,
    Segment,
    SnatIpAllocation,
    SnatIpAddress,
    SnatRule,
    LogicalSwitch,
    DhcpProfile,
    DhcpServer,
    DhcpPort,
    DhcpIpPool,
}

impl Slot {
    pub const ALL: [Slot; 15] = [
        Slot::Tier0Gateway,
        Slot::TransportZone,
        Slot::EdgeCluster,
        Slot::SnatIpPool,
        Slot::Tier1Gateway,
        Slot::LocaleService,
        Slot::Segment,
        Slot::SnatIpAllocation,
        Slot::SnatIpAddress,
        Slot::SnatRule,
        Slot::LogicalSwitch,
        Slot::DhcpProfile,
        Slot::DhcpServer,
        Slot::DhcpPort,
        Slot::DhcpIpPool,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Slot::Tier0Gateway => "tier-0 gateway",
            Slot::TransportZone => "transport zone",
            Slot::EdgeCluster => "edge cluster",
            Slot::SnatIpPool => "SNAT IP pool",
            Slot::Tier1Gateway => "tier-1 gateway",
            Slot::LocaleService => "locale service",
            Slot::Segment => "segment",
            Slot::SnatIpAllocation => "SNAT IP allocation",
            Slot::SnatIpAddress => "SNAT IP address",
            Slot::SnatRule => "SNAT rule",
            Slot::LogicalSwitch => "logical switch",
            Slot::DhcpProfile => "DHCP profile",
            Slot::DhcpServer => "DHCP server",
            Slot::DhcpPort => "DHCP port",
            Slot::DhcpIpPool => "DHCP IP pool",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// References held for manager API (DHCP) objects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedDhcpState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logical_switch_ref: Option<Reference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_ref: Option<Reference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_ref: Option<Reference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port_ref: Option<Reference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_pool_ref: Option<Reference>,
}

/// Infrastructure state persisted by the caller between runs.
///
/// A present reference must point to an existing remote object; tasks rely on
/// it to tell "already ensured" from "needs creation".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InfraState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier0_gateway_ref: Option<Reference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport_zone_ref: Option<Reference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edge_cluster_ref: Option<Reference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snat_ip_pool_ref: Option<Reference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier1_gateway_ref: Option<Reference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale_service_ref: Option<Reference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment_ref: Option<Reference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snat_ip_allocation_ref: Option<Reference>,
    /// Realized SNAT address; `id` holds the IP, `path` the allocation it came from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snat_ip_address_ref: Option<Reference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snat_rule_ref: Option<Reference>,
    pub advanced_dhcp: AdvancedDhcpState,
}

impl InfraState {
    pub fn slot(&self, slot: Slot) -> &Option<Reference> {
        match slot {
            Slot::Tier0Gateway => &self.tier0_gateway_ref,
            Slot::TransportZone => &self.transport_zone_ref,
            Slot::EdgeCluster => &self.edge_cluster_ref,
            Slot::SnatIpPool => &self.snat_ip_pool_ref,
            Slot::Tier1Gateway => &self.tier1_gateway_ref,
            Slot::LocaleService => &self.locale_service_ref,
            Slot::Segment => &self.segment_ref,
            Slot::SnatIpAllocation => &self.snat_ip_allocation_ref,
            Slot::SnatIpAddress => &self.snat_ip_address_ref,
            Slot::SnatRule => &self.snat_rule_ref,
            Slot::LogicalSwitch => &self.advanced_dhcp.logical_switch_ref,
            Slot::DhcpProfile => &self.advanced_dhcp.profile_ref,
            Slot::DhcpServer => &self.advanced_dhcp.server_ref,
            Slot::DhcpPort => &self.advanced_dhcp.port_ref,
            Slot::DhcpIpPool => &self.advanced_dhcp.ip_pool_ref,
        }
    }

    pub fn slot_mut(&mut self, slot: Slot) -> &mut Option<Reference> {
        match slot {
            Slot::Tier0Gateway => &mut self.tier0_gateway_ref,
            Slot::TransportZone => &mut self.transport_zone_ref,
            Slot::EdgeCluster => &mut self.edge_cluster_ref,
            Slot::SnatIpPool => &mut self.snat_ip_pool_ref,
            Slot::Tier1Gateway => &mut self.tier1_gateway_ref,
            Slot::LocaleService => &mut self.locale_service_ref,
            Slot::Segment => &mut self.segment_ref,
            Slot::SnatIpAllocation => &mut self.snat_ip_allocation_ref,
            Slot::SnatIpAddress => &mut self.snat_ip_address_ref,
            Slot::SnatRule => &mut self.snat_rule_ref,
            Slot::LogicalSwitch => &mut self.advanced_dhcp.logical_switch_ref,
            Slot::DhcpProfile => &mut self.advanced_dhcp.profile_ref,
            Slot::DhcpServer => &mut self.advanced_dhcp.server_ref,
            Slot::DhcpPort => &mut self.advanced_dhcp.port_ref,
            Slot::DhcpIpPool => &mut self.advanced_dhcp.ip_pool_ref,
        }
    }

    pub fn reference(&self, slot: Slot) -> Option<&Reference> {
        self.slot(slot).as_ref()
    }

    pub fn set(&mut self, slot: Slot, reference: Reference) {
        *self.slot_mut(slot) = Some(reference);
    }

    pub fn clear(&mut self, slot: Slot) -> Option<Reference> {
        self.slot_mut(slot).take()
    }

    /// True if no slot holds a reference.
    pub fn is_empty(&self) -> bool {
        Slot::ALL.iter().all(|s| self.slot(*s).is_none())
    }

    /// Load state from `path`. A missing file yields an empty state.
    pub fn load(path: &Path) -> Result<Self, StateError> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Save state to `path` via a sibling temp file and rename.
    pub fn save(&self, path: &Path) -> Result<(), StateError> {
        let json = serde_json::to_vec_pretty(self)?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_set_and_clear() {
        let mut state = InfraState::default();
        assert!(state.is_empty());

        for slot in Slot::ALL {
            state.set(slot, Reference::new(slot.as_str(), "/p"));
        }
        for slot in Slot::ALL {
            assert_eq!(state.reference(slot).unwrap().id, slot.as_str());
        }

        let cleared = state.clear(Slot::DhcpPort).unwrap();
        assert_eq!(cleared.id, "DHCP port");
        assert!(state.reference(Slot::DhcpPort).is_none());
        assert!(!state.is_empty());
    }

    #[test]
    fn test_empty_state_serializes_compactly() {
        let json = serde_json::to_value(InfraState::default()).unwrap();
        assert_eq!(json, serde_json::json!({ "advanced_dhcp": {} }));

        let parsed: InfraState = serde_json::from_str("{}").unwrap();
        assert!(parsed.is_empty());
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let state = InfraState::load(&dir.path().join("absent.json")).unwrap();
        assert!(state.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut state = InfraState::default();
        state.set(Slot::Tier1Gateway, Reference::new("t1", "/infra/tier-1s/t1"));
        state.set(
            Slot::DhcpServer,
            Reference::new("srv", "/api/v1/dhcp/servers/srv"),
        );
        state.save(&path).unwrap();

        let loaded = InfraState::load(&path).unwrap();
        assert_eq!(loaded, state);
        assert!(!dir.path().join("state.json.tmp").exists());
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(InfraState::load(&path), Err(StateError::Json(_))));
    }
}
