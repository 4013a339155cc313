//! DHCP for the workers segment, built with the manager API: profile, server,
//! logical port attaching the server to the segment's logical switch, and the
//! address pool.

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use super::policy::{required_id, required_path};
use super::{Action, RecoverableAdvancedTask, Recovery, Task, restore_unique};
use crate::context::EnsurerContext;
use crate::error::{EnsureError, Result};
use crate::remote::{ManagerKind, POLICY_PATH_SCOPE, RemoteObject, Tag};
use crate::spec::InfraSpec;
use crate::state::{InfraState, Reference, Slot};

/// Verify, update or create the manager object of `slot`.
async fn ensure_manager_object(
    ctx: &EnsurerContext<'_>,
    state: &mut InfraState,
    slot: Slot,
    kind: ManagerKind,
    parent: Option<&str>,
    desired: RemoteObject,
) -> Result<Action> {
    if let Some(reference) = state.reference(slot).cloned() {
        let path = reference
            .path
            .clone()
            .unwrap_or_else(|| kind.path(parent, &reference.id));
        return match ctx.manager().get(&path).await {
            Ok(mut existing) => {
                if existing.matches(&desired) {
                    return Ok(Action::Unchanged);
                }
                existing.apply(&desired);
                let updated = ctx.manager().update(&path, &existing).await?;
                state.set(slot, Reference::from_object(&updated));
                Ok(Action::Updated)
            }
            Err(e) if e.is_not_found() => {
                state.clear(slot);
                Err(EnsureError::Consistency {
                    slot,
                    id: reference.id,
                })
            }
            Err(e) => Err(e.into()),
        };
    }

    let created = ctx.manager().create(kind, parent, &desired).await?;
    state.set(slot, Reference::from_object(&created));
    Ok(Action::Created)
}

async fn delete_manager_object(
    ctx: &EnsurerContext<'_>,
    state: &mut InfraState,
    slot: Slot,
    kind: ManagerKind,
    parent: Option<&str>,
) -> Result<bool> {
    let Some(reference) = state.reference(slot).cloned() else {
        return Ok(false);
    };
    let path = reference
        .path
        .unwrap_or_else(|| kind.path(parent, &reference.id));

    match ctx.manager().delete(&path).await {
        Ok(()) => {}
        Err(e) if e.is_not_found() => debug!(path = %path, "Already deleted"),
        Err(e) => return Err(e.into()),
    }
    state.clear(slot);
    Ok(true)
}

/// Restore `slot` from the manager tag search if exactly one object matches.
async fn recover_by_search(
    ctx: &EnsurerContext<'_>,
    state: &mut InfraState,
    label: &str,
    slot: Slot,
    kind: ManagerKind,
    tags: &[Tag],
) -> Result<bool> {
    let matches = ctx.manager().search(kind, tags).await?;
    Ok(restore_unique(state, label, matches, |state, object| {
        state.set(slot, Reference::from_object(object))
    }))
}

/// Finds the logical switch the control plane realized for the segment.
pub struct LookupLogicalSwitchTask;

#[async_trait]
impl Task for LookupLogicalSwitchTask {
    fn label(&self) -> &'static str {
        "logical switch lookup"
    }

    fn slot(&self) -> Slot {
        Slot::LogicalSwitch
    }

    fn name_to_log(&self, _spec: &InfraSpec) -> Option<String> {
        None
    }

    async fn ensure(
        &self,
        ctx: &EnsurerContext<'_>,
        _spec: &InfraSpec,
        state: &mut InfraState,
    ) -> Result<Action> {
        let segment_path = required_path(state, Slot::Segment)?;
        let switches = ctx
            .manager()
            .search(
                ManagerKind::LogicalSwitch,
                &[Tag::new(POLICY_PATH_SCOPE, &segment_path)],
            )
            .await?;
        let switch = switches
            .first()
            .ok_or_else(|| EnsureError::NotRealized {
                what: format!("logical switch for segment {}", segment_path),
            })?;
        let reference = Reference::from_object(switch);
        if state.reference(Slot::LogicalSwitch) == Some(&reference) {
            return Ok(Action::Unchanged);
        }
        state.set(Slot::LogicalSwitch, reference);
        Ok(Action::Found)
    }

    async fn ensure_deleted(
        &self,
        _ctx: &EnsurerContext<'_>,
        state: &mut InfraState,
    ) -> Result<bool> {
        state.clear(Slot::LogicalSwitch);
        Ok(false)
    }
}

/// DHCP server profile bound to the edge cluster.
pub struct DhcpProfileTask;

#[async_trait]
impl Task for DhcpProfileTask {
    fn label(&self) -> &'static str {
        "DHCP profile"
    }

    fn slot(&self) -> Slot {
        Slot::DhcpProfile
    }

    fn name_to_log(&self, spec: &InfraSpec) -> Option<String> {
        Some(spec.full_cluster_name())
    }

    async fn ensure(
        &self,
        ctx: &EnsurerContext<'_>,
        spec: &InfraSpec,
        state: &mut InfraState,
    ) -> Result<Action> {
        let edge_cluster_id = required_id(state, Slot::EdgeCluster)?;
        let desired = RemoteObject::new("", spec.full_cluster_name())
            .with_tags(spec.create_common_tags())
            .with_property("edge_cluster_id", edge_cluster_id);
        ensure_manager_object(
            ctx,
            state,
            Slot::DhcpProfile,
            ManagerKind::DhcpProfile,
            None,
            desired,
        )
        .await
    }

    async fn ensure_deleted(
        &self,
        ctx: &EnsurerContext<'_>,
        state: &mut InfraState,
    ) -> Result<bool> {
        delete_manager_object(ctx, state, Slot::DhcpProfile, ManagerKind::DhcpProfile, None)
            .await
    }

    fn recovery(&self) -> Option<Recovery<'_>> {
        Some(Recovery::Advanced(self))
    }
}

#[async_trait]
impl RecoverableAdvancedTask for DhcpProfileTask {
    async fn try_recover(
        &self,
        ctx: &EnsurerContext<'_>,
        state: &mut InfraState,
        tags: &[Tag],
    ) -> Result<bool> {
        recover_by_search(
            ctx,
            state,
            self.label(),
            Slot::DhcpProfile,
            ManagerKind::DhcpProfile,
            tags,
        )
        .await
    }
}

/// Logical DHCP server serving the workers network.
pub struct DhcpServerTask;

#[async_trait]
impl Task for DhcpServerTask {
    fn label(&self) -> &'static str {
        "DHCP server"
    }

    fn slot(&self) -> Slot {
        Slot::DhcpServer
    }

    fn name_to_log(&self, spec: &InfraSpec) -> Option<String> {
        Some(spec.full_cluster_name())
    }

    async fn ensure(
        &self,
        ctx: &EnsurerContext<'_>,
        spec: &InfraSpec,
        state: &mut InfraState,
    ) -> Result<Action> {
        let profile_id = required_id(state, Slot::DhcpProfile)?;
        let desired = RemoteObject::new("", spec.full_cluster_name())
            .with_tags(spec.create_common_tags())
            .with_property("dhcp_profile_id", profile_id)
            .with_property(
                "ipv4_dhcp_server",
                json!({
                    "dhcp_server_ip": spec.dhcp_server_cidr(),
                    "gateway_ip": spec.gateway_address().to_string(),
                    "dns_nameservers": spec.dns_server_strings(),
                    "lease_time": spec.dhcp_lease_time,
                }),
            );
        ensure_manager_object(
            ctx,
            state,
            Slot::DhcpServer,
            ManagerKind::DhcpServer,
            None,
            desired,
        )
        .await
    }

    async fn ensure_deleted(
        &self,
        ctx: &EnsurerContext<'_>,
        state: &mut InfraState,
    ) -> Result<bool> {
        delete_manager_object(ctx, state, Slot::DhcpServer, ManagerKind::DhcpServer, None).await
    }

    fn recovery(&self) -> Option<Recovery<'_>> {
        Some(Recovery::Advanced(self))
    }
}

#[async_trait]
impl RecoverableAdvancedTask for DhcpServerTask {
    async fn try_recover(
        &self,
        ctx: &EnsurerContext<'_>,
        state: &mut InfraState,
        tags: &[Tag],
    ) -> Result<bool> {
        recover_by_search(
            ctx,
            state,
            self.label(),
            Slot::DhcpServer,
            ManagerKind::DhcpServer,
            tags,
        )
        .await
    }
}

/// Logical port attaching the DHCP server to the segment's logical switch.
pub struct DhcpPortTask;

#[async_trait]
impl Task for DhcpPortTask {
    fn label(&self) -> &'static str {
        "DHCP port"
    }

    fn slot(&self) -> Slot {
        Slot::DhcpPort
    }

    fn name_to_log(&self, spec: &InfraSpec) -> Option<String> {
        Some(spec.full_cluster_name())
    }

    async fn ensure(
        &self,
        ctx: &EnsurerContext<'_>,
        spec: &InfraSpec,
        state: &mut InfraState,
    ) -> Result<Action> {
        let switch_id = required_id(state, Slot::LogicalSwitch)?;
        let server_id = required_id(state, Slot::DhcpServer)?;
        let desired = RemoteObject::new("", spec.full_cluster_name())
            .with_tags(spec.create_common_tags())
            .with_property("logical_switch_id", switch_id)
            .with_property("admin_state", "UP")
            .with_property(
                "attachment",
                json!({ "attachment_type": "DHCP_SERVICE", "id": server_id }),
            );
        ensure_manager_object(
            ctx,
            state,
            Slot::DhcpPort,
            ManagerKind::LogicalPort,
            None,
            desired,
        )
        .await
    }

    async fn ensure_deleted(
        &self,
        ctx: &EnsurerContext<'_>,
        state: &mut InfraState,
    ) -> Result<bool> {
        delete_manager_object(ctx, state, Slot::DhcpPort, ManagerKind::LogicalPort, None).await
    }

    fn recovery(&self) -> Option<Recovery<'_>> {
        Some(Recovery::Advanced(self))
    }
}

#[async_trait]
impl RecoverableAdvancedTask for DhcpPortTask {
    async fn try_recover(
        &self,
        ctx: &EnsurerContext<'_>,
        state: &mut InfraState,
        tags: &[Tag],
    ) -> Result<bool> {
        recover_by_search(
            ctx,
            state,
            self.label(),
            Slot::DhcpPort,
            ManagerKind::LogicalPort,
            tags,
        )
        .await
    }
}

/// Address range handed out by the DHCP server.
pub struct DhcpIpPoolTask;

#[async_trait]
impl Task for DhcpIpPoolTask {
    fn label(&self) -> &'static str {
        "DHCP IP pool"
    }

    fn slot(&self) -> Slot {
        Slot::DhcpIpPool
    }

    fn name_to_log(&self, spec: &InfraSpec) -> Option<String> {
        Some(spec.full_cluster_name())
    }

    async fn ensure(
        &self,
        ctx: &EnsurerContext<'_>,
        spec: &InfraSpec,
        state: &mut InfraState,
    ) -> Result<Action> {
        let server_id = required_id(state, Slot::DhcpServer)?;
        let (start, end) = spec.dhcp_range();
        let desired = RemoteObject::new("", spec.full_cluster_name())
            .with_tags(spec.create_common_tags())
            .with_property(
                "allocation_ranges",
                json!([{ "start": start.to_string(), "end": end.to_string() }]),
            )
            .with_property("gateway_ip", spec.gateway_address().to_string())
            .with_property("lease_time", spec.dhcp_lease_time);
        ensure_manager_object(
            ctx,
            state,
            Slot::DhcpIpPool,
            ManagerKind::DhcpIpPool,
            Some(server_id.as_str()),
            desired,
        )
        .await
    }

    async fn ensure_deleted(
        &self,
        ctx: &EnsurerContext<'_>,
        state: &mut InfraState,
    ) -> Result<bool> {
        let server_id = state.reference(Slot::DhcpServer).map(|r| r.id.clone());
        delete_manager_object(
            ctx,
            state,
            Slot::DhcpIpPool,
            ManagerKind::DhcpIpPool,
            server_id.as_deref(),
        )
        .await
    }

    fn recovery(&self) -> Option<Recovery<'_>> {
        Some(Recovery::Advanced(self))
    }
}

/// IP pools are not covered by the global search; list them below the server.
#[async_trait]
impl RecoverableAdvancedTask for DhcpIpPoolTask {
    async fn try_recover(
        &self,
        ctx: &EnsurerContext<'_>,
        state: &mut InfraState,
        tags: &[Tag],
    ) -> Result<bool> {
        let server_id = required_id(state, Slot::DhcpServer)?;
        let matches = ctx
            .manager()
            .list(ManagerKind::DhcpIpPool, Some(server_id.as_str()))
            .await?
            .into_iter()
            .filter(|o| o.has_tags(tags))
            .collect();
        Ok(restore_unique(state, self.label(), matches, |state, object| {
            state.set(Slot::DhcpIpPool, Reference::from_object(object))
        }))
    }
}
