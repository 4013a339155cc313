//! Remote control plane interfaces.
//!
//! Two API families are consumed:
//! - the policy API: path addressed, declarative create-or-update (gateways,
//!   segments, IP allocations, NAT rules)
//! - the manager API: id addressed with a tag search (DHCP profile, server,
//!   logical port, IP pool)
//!
//! Both exchange [`RemoteObject`]s. Implementations live in [`rest`] (HTTP)
//! and [`memory`] (in-process, used by tests).

pub mod memory;
pub mod rest;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ApiError;

/// Result type for remote calls.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Root of all policy objects created by this crate.
pub const INFRA: &str = "/infra";

/// Parent of policy objects owned by the default enforcement point.
pub const ENFORCEMENT_POINT: &str = "/infra/sites/default/enforcement-points/default";

/// Tag scope the control plane puts on manager objects realized from a policy object.
pub const POLICY_PATH_SCOPE: &str = "policyPath";

/// Key/value label attached to remote objects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub scope: String,
    pub tag: String,
}

impl Tag {
    pub fn new(scope: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            tag: tag.into(),
        }
    }
}

/// A remote object as exchanged with either API family.
///
/// Well-known fields are typed; everything else lives in `properties`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteObject {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl RemoteObject {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            ..Default::default()
        }
    }

    pub fn with_tags(mut self, tags: Vec<Tag>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }

    /// True if every tag in `tags` is attached to this object.
    pub fn has_tags(&self, tags: &[Tag]) -> bool {
        tags.iter().all(|t| self.tags.contains(t))
    }

    /// True if this (existing) object already has the shape of `desired`.
    ///
    /// Server-maintained properties absent from `desired` are ignored.
    pub fn matches(&self, desired: &RemoteObject) -> bool {
        self.display_name == desired.display_name
            && self.tags.len() == desired.tags.len()
            && self.has_tags(&desired.tags)
            && desired
                .properties
                .iter()
                .all(|(k, v)| self.properties.get(k) == Some(v))
    }

    /// Overwrites name, tags and desired properties, keeping server fields.
    pub fn apply(&mut self, desired: &RemoteObject) {
        self.display_name = desired.display_name.clone();
        self.tags = desired.tags.clone();
        for (k, v) in &desired.properties {
            self.properties.insert(k.clone(), v.clone());
        }
    }
}

/// One page of a list call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub results: Vec<RemoteObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// Policy API resource types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyKind {
    Tier0Gateway,
    TransportZone,
    EdgeCluster,
    IpPool,
    Tier1Gateway,
    LocaleService,
    Segment,
    IpAllocation,
    NatRule,
}

impl PolicyKind {
    /// URL collection segment below the parent path.
    pub fn collection(&self) -> &'static str {
        match self {
            PolicyKind::Tier0Gateway => "tier-0s",
            PolicyKind::TransportZone => "transport-zones",
            PolicyKind::EdgeCluster => "edge-clusters",
            PolicyKind::IpPool => "ip-pools",
            PolicyKind::Tier1Gateway => "tier-1s",
            PolicyKind::LocaleService => "locale-services",
            PolicyKind::Segment => "segments",
            PolicyKind::IpAllocation => "ip-allocations",
            PolicyKind::NatRule => "nat-rules",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyKind::Tier0Gateway => "tier-0 gateway",
            PolicyKind::TransportZone => "transport zone",
            PolicyKind::EdgeCluster => "edge cluster",
            PolicyKind::IpPool => "IP pool",
            PolicyKind::Tier1Gateway => "tier-1 gateway",
            PolicyKind::LocaleService => "locale service",
            PolicyKind::Segment => "segment",
            PolicyKind::IpAllocation => "IP allocation",
            PolicyKind::NatRule => "NAT rule",
        }
    }

    pub fn collection_path(&self, parent: &str) -> String {
        format!("{}/{}", parent, self.collection())
    }

    pub fn path(&self, parent: &str, id: &str) -> String {
        format!("{}/{}/{}", parent, self.collection(), id)
    }
}

/// Manager API resource types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManagerKind {
    LogicalSwitch,
    DhcpProfile,
    DhcpServer,
    LogicalPort,
    /// Nested below a DHCP server.
    DhcpIpPool,
}

impl ManagerKind {
    pub fn resource_type(&self) -> &'static str {
        match self {
            ManagerKind::LogicalSwitch => "LogicalSwitch",
            ManagerKind::DhcpProfile => "DhcpProfile",
            ManagerKind::DhcpServer => "LogicalDhcpServer",
            ManagerKind::LogicalPort => "LogicalPort",
            ManagerKind::DhcpIpPool => "DhcpIpPool",
        }
    }

    /// Collection path; `parent` is the DHCP server id for IP pools and ignored otherwise.
    pub fn collection_path(&self, parent: Option<&str>) -> String {
        match self {
            ManagerKind::LogicalSwitch => "/api/v1/logical-switches".to_string(),
            ManagerKind::DhcpProfile => "/api/v1/dhcp/server-profiles".to_string(),
            ManagerKind::DhcpServer => "/api/v1/dhcp/servers".to_string(),
            ManagerKind::LogicalPort => "/api/v1/logical-ports".to_string(),
            ManagerKind::DhcpIpPool => format!(
                "/api/v1/dhcp/servers/{}/ip-pools",
                parent.unwrap_or_default()
            ),
        }
    }

    pub fn path(&self, parent: Option<&str>, id: &str) -> String {
        format!("{}/{}", self.collection_path(parent), id)
    }
}

/// Policy API client.
#[async_trait]
pub trait PolicyApi: Send + Sync {
    /// Fetch one object by its path.
    async fn get(&self, path: &str) -> Result<RemoteObject>;

    /// List one page of objects of `kind` below `parent`.
    async fn list(&self, kind: PolicyKind, parent: &str, cursor: Option<&str>) -> Result<Page>;

    /// Create or update `object` (its `id` must be set) and return the stored object.
    async fn patch(&self, kind: PolicyKind, parent: &str, object: &RemoteObject)
    -> Result<RemoteObject>;

    async fn delete(&self, path: &str) -> Result<()>;
}

/// Manager API client. Returned objects always carry their `path`.
#[async_trait]
pub trait ManagerApi: Send + Sync {
    async fn get(&self, path: &str) -> Result<RemoteObject>;

    async fn list(&self, kind: ManagerKind, parent: Option<&str>) -> Result<Vec<RemoteObject>>;

    /// Create `object`; the server assigns the id.
    async fn create(
        &self,
        kind: ManagerKind,
        parent: Option<&str>,
        object: &RemoteObject,
    ) -> Result<RemoteObject>;

    async fn update(&self, path: &str, object: &RemoteObject) -> Result<RemoteObject>;

    async fn delete(&self, path: &str) -> Result<()>;

    /// All objects of `kind` carrying every tag in `tags`.
    async fn search(&self, kind: ManagerKind, tags: &[Tag]) -> Result<Vec<RemoteObject>>;
}
