//! In-process control plane.
//!
//! Keeps objects in memory and behaves like the real control plane where the
//! ensurer depends on it: objects cannot be created below a missing parent or
//! deleted while something still refers to them, segments realize a logical
//! switch, and IP allocations get an address from their pool. Failures can be
//! injected per operation and resource kind.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use ipnet::Ipv4Net;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{
    ENFORCEMENT_POINT, INFRA, ManagerApi, ManagerKind, POLICY_PATH_SCOPE, Page, PolicyApi,
    PolicyKind, RemoteObject, Result, Tag,
};
use crate::error::ApiError;
use crate::spec::InfraSpec;
use crate::tasks::snat::ALLOCATION_IP;

/// Address range of the SNAT pool created by [`MemoryControlPlane::with_lookups`].
pub const SNAT_POOL_CIDR: &str = "192.168.100.0/24";

const DEFAULT_PAGE_SIZE: usize = 1000;

/// Remote operation, for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Get,
    List,
    Create,
    Update,
    Delete,
    Search,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Policy(PolicyKind),
    Manager(ManagerKind),
}

impl From<PolicyKind> for ResourceKind {
    fn from(kind: PolicyKind) -> Self {
        ResourceKind::Policy(kind)
    }
}

impl From<ManagerKind> for ResourceKind {
    fn from(kind: ManagerKind) -> Self {
        ResourceKind::Manager(kind)
    }
}

struct Stored {
    kind: ResourceKind,
    /// Parent path (policy) or collection path (manager).
    parent: String,
    object: RemoteObject,
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<String, Stored>,
    failures: Vec<(Operation, ResourceKind)>,
    created: usize,
}

impl Inner {
    fn check(&self, op: Operation, kind: ResourceKind) -> Result<()> {
        if self.failures.contains(&(op, kind)) {
            return Err(ApiError::Injected(format!("{:?} {:?}", op, kind)));
        }
        Ok(())
    }

    fn policy_parent_exists(&self, parent: &str) -> bool {
        parent == INFRA
            || parent == ENFORCEMENT_POINT
            || self.objects.contains_key(parent)
            || parent
                .strip_suffix("/nat/USER")
                .is_some_and(|gateway| self.objects.contains_key(gateway))
    }

    fn find(&self, path: &str, policy: bool) -> Result<&Stored> {
        self.objects
            .get(path)
            .filter(|s| matches!(s.kind, ResourceKind::Policy(_)) == policy)
            .ok_or_else(|| ApiError::NotFound(path.to_string()))
    }

    /// Paths of manager objects realized from the policy object at `path`.
    fn realized_from(&self, path: &str) -> Vec<String> {
        let tag = Tag::new(POLICY_PATH_SCOPE, path);
        self.objects
            .iter()
            .filter(|(_, s)| s.object.tags.contains(&tag))
            .map(|(p, _)| p.clone())
            .collect()
    }

    /// First object still referring to the object at `path` (or to what was realized from it).
    fn dependent_of(&self, path: &str) -> Option<String> {
        let mut needles = vec![path.to_string()];
        let mut owned = self.realized_from(path);
        owned.push(path.to_string());
        // manager objects are referred to by id
        needles.extend(
            owned
                .iter()
                .filter_map(|p| self.objects.get(p))
                .filter(|s| matches!(s.kind, ResourceKind::Manager(_)))
                .map(|s| s.object.id.clone()),
        );

        let child_prefix = format!("{}/", path);
        self.objects
            .iter()
            .filter(|(p, _)| !owned.contains(*p))
            .find(|(p, s)| {
                p.starts_with(&child_prefix)
                    || s.parent == path
                    || needles.iter().any(|n| refers_to(&s.object.properties, n))
            })
            .map(|(p, _)| p.clone())
    }

    fn remove(&mut self, path: &str, policy: bool) -> Result<()> {
        let kind = self.find(path, policy)?.kind;
        self.check(Operation::Delete, kind)?;
        if let Some(dependent) = self.dependent_of(path) {
            return Err(ApiError::Conflict(format!(
                "{} is still referenced by {}",
                path, dependent
            )));
        }
        for realized in self.realized_from(path) {
            self.objects.remove(&realized);
        }
        self.objects.remove(path);
        Ok(())
    }

    /// First free host of the pool at `pool_path`, if it carries a `cidr`.
    fn allocate_ip(&self, pool_path: &str) -> Option<String> {
        let pool = self.objects.get(pool_path)?;
        let net: Ipv4Net = pool.object.property_str("cidr")?.parse().ok()?;
        let used: Vec<&str> = self
            .objects
            .values()
            .filter(|s| s.kind == ResourceKind::Policy(PolicyKind::IpAllocation))
            .filter(|s| s.parent == pool_path)
            .filter_map(|s| s.object.property_str(ALLOCATION_IP))
            .collect();
        net.hosts()
            .map(|ip| ip.to_string())
            .find(|ip| !used.contains(&ip.as_str()))
    }

    fn realize_switch(&mut self, segment: &RemoteObject, segment_path: &str) {
        let kind = ManagerKind::LogicalSwitch;
        let id = Uuid::new_v4().to_string();
        let path = kind.path(None, &id);
        let mut object = RemoteObject::new(id, segment.display_name.clone())
            .with_tags(vec![Tag::new(POLICY_PATH_SCOPE, segment_path)]);
        object.path = Some(path.clone());
        self.objects.insert(
            path,
            Stored {
                kind: kind.into(),
                parent: kind.collection_path(None),
                object,
            },
        );
    }
}

fn refers_to(properties: &Map<String, Value>, needle: &str) -> bool {
    fn walk(value: &Value, needle: &str) -> bool {
        match value {
            Value::String(s) => s == needle,
            Value::Array(items) => items.iter().any(|v| walk(v, needle)),
            Value::Object(map) => map.values().any(|v| walk(v, needle)),
            _ => false,
        }
    }
    properties.values().any(|v| walk(v, needle))
}

/// In-memory implementation of both API families.
pub struct MemoryControlPlane {
    inner: Mutex<Inner>,
    page_size: usize,
}

impl Default for MemoryControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryControlPlane {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Control plane holding the pre-existing objects `spec` looks up.
    pub fn with_lookups(spec: &InfraSpec) -> Self {
        let plane = Self::new();
        plane.seed(PolicyKind::Tier0Gateway, INFRA, &spec.tier0_gateway_name);
        plane.seed(
            PolicyKind::TransportZone,
            ENFORCEMENT_POINT,
            &spec.transport_zone_name,
        );
        plane.seed(
            PolicyKind::EdgeCluster,
            ENFORCEMENT_POINT,
            &spec.edge_cluster_name,
        );
        plane.seed_object(
            PolicyKind::IpPool,
            INFRA,
            RemoteObject::new(Uuid::new_v4().to_string(), spec.snat_ip_pool_name.clone())
                .with_property("cidr", SNAT_POOL_CIDR),
        );
        plane
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a pre-existing policy object. Not counted as created.
    pub fn seed(&self, kind: PolicyKind, parent: &str, display_name: &str) -> RemoteObject {
        self.seed_object(
            kind,
            parent,
            RemoteObject::new(Uuid::new_v4().to_string(), display_name),
        )
    }

    pub fn seed_object(&self, kind: PolicyKind, parent: &str, mut object: RemoteObject) -> RemoteObject {
        let path = kind.path(parent, &object.id);
        object.path = Some(path.clone());
        self.lock().objects.insert(
            path,
            Stored {
                kind: kind.into(),
                parent: parent.to_string(),
                object: object.clone(),
            },
        );
        object
    }

    /// Make every `op` on `kind` fail until [`clear_failures`](Self::clear_failures).
    pub fn fail(&self, op: Operation, kind: impl Into<ResourceKind>) {
        self.lock().failures.push((op, kind.into()));
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Number of objects created through the APIs (seeds and realized objects excluded).
    pub fn created_count(&self) -> usize {
        self.lock().created
    }

    pub fn exists(&self, path: &str) -> bool {
        self.lock().objects.contains_key(path)
    }

    pub fn objects(&self, kind: impl Into<ResourceKind>) -> Vec<RemoteObject> {
        let kind = kind.into();
        self.lock()
            .objects
            .values()
            .filter(|s| s.kind == kind)
            .map(|s| s.object.clone())
            .collect()
    }

    pub fn count(&self, kind: impl Into<ResourceKind>) -> usize {
        self.objects(kind).len()
    }

    /// Drop an object behind the ensurer's back, ignoring dependents.
    pub fn remove(&self, path: &str) -> Option<RemoteObject> {
        self.lock().objects.remove(path).map(|s| s.object)
    }
}

#[async_trait]
impl PolicyApi for MemoryControlPlane {
    async fn get(&self, path: &str) -> Result<RemoteObject> {
        let inner = self.lock();
        let stored = inner.find(path, true)?;
        inner.check(Operation::Get, stored.kind)?;
        Ok(stored.object.clone())
    }

    async fn list(&self, kind: PolicyKind, parent: &str, cursor: Option<&str>) -> Result<Page> {
        let inner = self.lock();
        inner.check(Operation::List, kind.into())?;
        let start = match cursor {
            Some(c) => c.parse::<usize>().map_err(|_| ApiError::Status {
                code: 400,
                message: format!("invalid cursor {}", c),
            })?,
            None => 0,
        };

        let all: Vec<&Stored> = inner
            .objects
            .values()
            .filter(|s| s.kind == ResourceKind::Policy(kind) && s.parent == parent)
            .collect();
        let end = (start + self.page_size).min(all.len());
        let results = all
            .get(start..end)
            .unwrap_or_default()
            .iter()
            .map(|s| s.object.clone())
            .collect();
        let cursor = (end < all.len()).then(|| end.to_string());
        Ok(Page { results, cursor })
    }

    async fn patch(
        &self,
        kind: PolicyKind,
        parent: &str,
        object: &RemoteObject,
    ) -> Result<RemoteObject> {
        if object.id.is_empty() {
            return Err(ApiError::Status {
                code: 400,
                message: "object id is required".to_string(),
            });
        }
        let path = kind.path(parent, &object.id);
        let mut inner = self.lock();

        if let Some(stored) = inner.objects.get(&path) {
            inner.check(Operation::Update, stored.kind)?;
            let stored = inner
                .objects
                .get_mut(&path)
                .ok_or_else(|| ApiError::NotFound(path.clone()))?;
            stored.object.apply(object);
            return Ok(stored.object.clone());
        }

        inner.check(Operation::Create, kind.into())?;
        if !inner.policy_parent_exists(parent) {
            return Err(ApiError::NotFound(parent.to_string()));
        }

        let mut created = object.clone();
        created.path = Some(path.clone());
        match kind {
            PolicyKind::IpAllocation => {
                if let Some(ip) = inner.allocate_ip(parent) {
                    created.properties.insert(ALLOCATION_IP.to_string(), ip.into());
                }
            }
            PolicyKind::Segment => inner.realize_switch(&created, &path),
            _ => {}
        }
        inner.objects.insert(
            path,
            Stored {
                kind: kind.into(),
                parent: parent.to_string(),
                object: created.clone(),
            },
        );
        inner.created += 1;
        Ok(created)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.lock().remove(path, true)
    }
}

#[async_trait]
impl ManagerApi for MemoryControlPlane {
    async fn get(&self, path: &str) -> Result<RemoteObject> {
        let inner = self.lock();
        let stored = inner.find(path, false)?;
        inner.check(Operation::Get, stored.kind)?;
        Ok(stored.object.clone())
    }

    async fn list(&self, kind: ManagerKind, parent: Option<&str>) -> Result<Vec<RemoteObject>> {
        let inner = self.lock();
        inner.check(Operation::List, kind.into())?;
        let collection = kind.collection_path(parent);
        Ok(inner
            .objects
            .values()
            .filter(|s| s.kind == ResourceKind::Manager(kind) && s.parent == collection)
            .map(|s| s.object.clone())
            .collect())
    }

    async fn create(
        &self,
        kind: ManagerKind,
        parent: Option<&str>,
        object: &RemoteObject,
    ) -> Result<RemoteObject> {
        let mut inner = self.lock();
        inner.check(Operation::Create, kind.into())?;
        if kind == ManagerKind::DhcpIpPool {
            let server = ManagerKind::DhcpServer.path(None, parent.unwrap_or_default());
            inner.find(&server, false)?;
        }

        let mut created = object.clone();
        created.id = Uuid::new_v4().to_string();
        let path = kind.path(parent, &created.id);
        created.path = Some(path.clone());
        inner.objects.insert(
            path,
            Stored {
                kind: kind.into(),
                parent: kind.collection_path(parent),
                object: created.clone(),
            },
        );
        inner.created += 1;
        Ok(created)
    }

    async fn update(&self, path: &str, object: &RemoteObject) -> Result<RemoteObject> {
        let mut inner = self.lock();
        let kind = inner.find(path, false)?.kind;
        inner.check(Operation::Update, kind)?;
        let stored = inner
            .objects
            .get_mut(path)
            .ok_or_else(|| ApiError::NotFound(path.to_string()))?;
        stored.object.apply(object);
        Ok(stored.object.clone())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.lock().remove(path, false)
    }

    async fn search(&self, kind: ManagerKind, tags: &[Tag]) -> Result<Vec<RemoteObject>> {
        let inner = self.lock();
        inner.check(Operation::Search, kind.into())?;
        Ok(inner
            .objects
            .values()
            .filter(|s| s.kind == ResourceKind::Manager(kind) && s.object.has_tags(tags))
            .map(|s| s.object.clone())
            .collect())
    }
}
