//! SNAT: address allocation from the shared pool, its realized address, and
//! the NAT rule translating the workers network to it.

use async_trait::async_trait;

use super::policy::{delete_object, ensure_object, reference_path, required_path};
use super::{Action, RecoverableTask, Recovery, Task};
use crate::context::EnsurerContext;
use crate::error::{EnsureError, Result};
use crate::remote::{INFRA, Page, PolicyKind, RemoteObject};
use crate::spec::InfraSpec;
use crate::state::{InfraState, Reference, Slot};

/// Property holding the address realized for an IP allocation.
pub const ALLOCATION_IP: &str = "allocation_ip";

/// NAT rules live in the USER section below the gateway.
fn nat_section(tier1_path: &str) -> String {
    format!("{}/nat/USER", tier1_path)
}

/// IP address allocation in the looked-up SNAT IP pool.
pub struct SnatIpAllocationTask;

#[async_trait]
impl Task for SnatIpAllocationTask {
    fn label(&self) -> &'static str {
        "SNAT IP address allocation"
    }

    fn slot(&self) -> Slot {
        Slot::SnatIpAllocation
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
        let pool_path = required_path(state, Slot::SnatIpPool)?;
        let desired =
            RemoteObject::new("", spec.full_cluster_name()).with_tags(spec.create_tags());
        ensure_object(
            ctx,
            state,
            Slot::SnatIpAllocation,
            PolicyKind::IpAllocation,
            &pool_path,
            desired,
        )
        .await
    }

    async fn ensure_deleted(
        &self,
        ctx: &EnsurerContext<'_>,
        state: &mut InfraState,
    ) -> Result<bool> {
        let pool_path = reference_path(state, Slot::SnatIpPool, PolicyKind::IpPool, INFRA);
        delete_object(
            ctx,
            state,
            Slot::SnatIpAllocation,
            PolicyKind::IpAllocation,
            pool_path,
        )
        .await
    }

    fn recovery(&self) -> Option<Recovery<'_>> {
        Some(Recovery::Tagged(self))
    }
}

#[async_trait]
impl RecoverableTask for SnatIpAllocationTask {
    async fn list_all(
        &self,
        ctx: &EnsurerContext<'_>,
        state: &InfraState,
        cursor: Option<&str>,
    ) -> Result<Page> {
        let pool_path = required_path(state, Slot::SnatIpPool)?;
        Ok(ctx
            .policy()
            .list(PolicyKind::IpAllocation, &pool_path, cursor)
            .await?)
    }
}

/// Reads the address the control plane realized for the allocation.
pub struct SnatIpRealizationTask;

#[async_trait]
impl Task for SnatIpRealizationTask {
    fn label(&self) -> &'static str {
        "SNAT IP address realization"
    }

    fn slot(&self) -> Slot {
        Slot::SnatIpAddress
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
        let allocation_path = required_path(state, Slot::SnatIpAllocation)?;
        let allocation = ctx.policy().get(&allocation_path).await?;
        let address = allocation
            .property_str(ALLOCATION_IP)
            .filter(|ip| !ip.is_empty())
            .ok_or_else(|| EnsureError::NotRealized {
                what: format!("IP allocation {}", allocation_path),
            })?;

        let reference = Reference::new(address, allocation_path);
        if state.reference(Slot::SnatIpAddress) == Some(&reference) {
            return Ok(Action::Unchanged);
        }
        state.set(Slot::SnatIpAddress, reference);
        Ok(Action::Found)
    }

    /// The address goes away with its allocation.
    async fn ensure_deleted(
        &self,
        _ctx: &EnsurerContext<'_>,
        state: &mut InfraState,
    ) -> Result<bool> {
        state.clear(Slot::SnatIpAddress);
        Ok(false)
    }
}

/// SNAT rule on the tier-1 gateway.
pub struct SnatRuleTask;

#[async_trait]
impl Task for SnatRuleTask {
    fn label(&self) -> &'static str {
        "SNAT rule"
    }

    fn slot(&self) -> Slot {
        Slot::SnatRule
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
        let tier1_path = required_path(state, Slot::Tier1Gateway)?;
        let address = state
            .reference(Slot::SnatIpAddress)
            .map(|r| r.id.clone())
            .ok_or(EnsureError::MissingDependency {
                slot: Slot::SnatIpAddress,
            })?;
        let desired = RemoteObject::new("", spec.full_cluster_name())
            .with_tags(spec.create_tags())
            .with_property("action", "SNAT")
            .with_property("source_network", spec.workers_network.to_string())
            .with_property("translated_network", address)
            .with_property("enabled", true);
        ensure_object(
            ctx,
            state,
            Slot::SnatRule,
            PolicyKind::NatRule,
            &nat_section(&tier1_path),
            desired,
        )
        .await
    }

    async fn ensure_deleted(
        &self,
        ctx: &EnsurerContext<'_>,
        state: &mut InfraState,
    ) -> Result<bool> {
        let section = reference_path(state, Slot::Tier1Gateway, PolicyKind::Tier1Gateway, INFRA)
            .map(|tier1_path| nat_section(&tier1_path));
        delete_object(ctx, state, Slot::SnatRule, PolicyKind::NatRule, section).await
    }

    fn recovery(&self) -> Option<Recovery<'_>> {
        Some(Recovery::Tagged(self))
    }
}

#[async_trait]
impl RecoverableTask for SnatRuleTask {
    async fn list_all(
        &self,
        ctx: &EnsurerContext<'_>,
        state: &InfraState,
        cursor: Option<&str>,
    ) -> Result<Page> {
        let tier1_path = required_path(state, Slot::Tier1Gateway)?;
        Ok(ctx
            .policy()
            .list(PolicyKind::NatRule, &nat_section(&tier1_path), cursor)
            .await?)
    }
}
