//! Lookup of pre-existing policy objects by display name.

use async_trait::async_trait;

use super::{Action, Task};
use crate::context::EnsurerContext;
use crate::error::{EnsureError, Result};
use crate::remote::{ENFORCEMENT_POINT, INFRA, PolicyKind};
use crate::spec::InfraSpec;
use crate::state::{InfraState, Reference, Slot};

/// Finds an object the ensurer does not own (tier-0 gateway, transport zone,
/// edge cluster, SNAT IP pool) and records its reference.
pub struct LookupTask {
    label: &'static str,
    kind: PolicyKind,
    parent: &'static str,
    slot: Slot,
    name: fn(&InfraSpec) -> &str,
}

impl LookupTask {
    pub fn tier0_gateway() -> Self {
        Self {
            label: "tier-0 gateway lookup",
            kind: PolicyKind::Tier0Gateway,
            parent: INFRA,
            slot: Slot::Tier0Gateway,
            name: |spec| spec.tier0_gateway_name.as_str(),
        }
    }

    pub fn transport_zone() -> Self {
        Self {
            label: "transport zone lookup",
            kind: PolicyKind::TransportZone,
            parent: ENFORCEMENT_POINT,
            slot: Slot::TransportZone,
            name: |spec| spec.transport_zone_name.as_str(),
        }
    }

    pub fn edge_cluster() -> Self {
        Self {
            label: "edge cluster lookup",
            kind: PolicyKind::EdgeCluster,
            parent: ENFORCEMENT_POINT,
            slot: Slot::EdgeCluster,
            name: |spec| spec.edge_cluster_name.as_str(),
        }
    }

    pub fn snat_ip_pool() -> Self {
        Self {
            label: "SNAT IP pool lookup",
            kind: PolicyKind::IpPool,
            parent: INFRA,
            slot: Slot::SnatIpPool,
            name: |spec| spec.snat_ip_pool_name.as_str(),
        }
    }
}

#[async_trait]
impl Task for LookupTask {
    fn label(&self) -> &'static str {
        self.label
    }

    fn slot(&self) -> Slot {
        self.slot
    }

    fn name_to_log(&self, spec: &InfraSpec) -> Option<String> {
        Some((self.name)(spec).to_string())
    }

    async fn ensure(
        &self,
        ctx: &EnsurerContext<'_>,
        spec: &InfraSpec,
        state: &mut InfraState,
    ) -> Result<Action> {
        let name = (self.name)(spec);
        let mut cursor: Option<String> = None;
        loop {
            let page = ctx
                .policy()
                .list(self.kind, self.parent, cursor.as_deref())
                .await?;
            if let Some(object) = page.results.iter().find(|o| o.display_name == name) {
                let reference = Reference::from_object(object);
                if state.reference(self.slot) == Some(&reference) {
                    return Ok(Action::Unchanged);
                }
                state.set(self.slot, reference);
                return Ok(Action::Found);
            }
            match page.cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Err(EnsureError::NotFound {
            kind: self.kind.as_str(),
            name: name.to_string(),
        })
    }

    /// Nothing remote to delete; only the reference is dropped.
    async fn ensure_deleted(
        &self,
        _ctx: &EnsurerContext<'_>,
        state: &mut InfraState,
    ) -> Result<bool> {
        state.clear(self.slot);
        Ok(false)
    }
}
