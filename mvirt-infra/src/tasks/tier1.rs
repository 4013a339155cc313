//! Tier-1 gateway and its locale service.

use async_trait::async_trait;
use serde_json::json;

use super::policy::{delete_object, ensure_object, reference_path, required_path};
use super::{Action, RecoverableTask, Recovery, Task};
use crate::context::EnsurerContext;
use crate::error::Result;
use crate::remote::{INFRA, Page, PolicyKind, RemoteObject};
use crate::spec::InfraSpec;
use crate::state::{InfraState, Slot};

/// Locale services are singletons below their gateway.
const LOCALE_SERVICE_ID: &str = "default";

/// Tier-1 gateway connected to the looked-up tier-0 gateway.
pub struct Tier1GatewayTask;

impl Tier1GatewayTask {
    fn desired(spec: &InfraSpec, state: &InfraState) -> Result<RemoteObject> {
        let tier0_path = required_path(state, Slot::Tier0Gateway)?;
        Ok(RemoteObject::new("", spec.full_cluster_name())
            .with_tags(spec.create_tags())
            .with_property("tier0_path", tier0_path)
            .with_property("failover_mode", "NON_PREEMPTIVE")
            .with_property(
                "route_advertisement_types",
                json!(["TIER1_STATIC_ROUTES", "TIER1_NAT"]),
            ))
    }
}

#[async_trait]
impl Task for Tier1GatewayTask {
    fn label(&self) -> &'static str {
        "tier-1 gateway"
    }

    fn slot(&self) -> Slot {
        Slot::Tier1Gateway
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
        let desired = Self::desired(spec, state)?;
        ensure_object(
            ctx,
            state,
            Slot::Tier1Gateway,
            PolicyKind::Tier1Gateway,
            INFRA,
            desired,
        )
        .await
    }

    async fn ensure_deleted(
        &self,
        ctx: &EnsurerContext<'_>,
        state: &mut InfraState,
    ) -> Result<bool> {
        let parent = Ok(INFRA.to_string());
        delete_object(ctx, state, Slot::Tier1Gateway, PolicyKind::Tier1Gateway, parent).await
    }

    fn recovery(&self) -> Option<Recovery<'_>> {
        Some(Recovery::Tagged(self))
    }
}

#[async_trait]
impl RecoverableTask for Tier1GatewayTask {
    async fn list_all(
        &self,
        ctx: &EnsurerContext<'_>,
        _state: &InfraState,
        cursor: Option<&str>,
    ) -> Result<Page> {
        Ok(ctx
            .policy()
            .list(PolicyKind::Tier1Gateway, INFRA, cursor)
            .await?)
    }
}

/// Locale service placing the tier-1 gateway on the looked-up edge cluster.
pub struct LocaleServiceTask;

#[async_trait]
impl Task for LocaleServiceTask {
    fn label(&self) -> &'static str {
        "tier-1 gateway locale service"
    }

    fn slot(&self) -> Slot {
        Slot::LocaleService
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
        let edge_cluster_path = required_path(state, Slot::EdgeCluster)?;
        let desired = RemoteObject::new(LOCALE_SERVICE_ID, spec.full_cluster_name())
            .with_tags(spec.create_tags())
            .with_property("edge_cluster_path", edge_cluster_path);
        ensure_object(
            ctx,
            state,
            Slot::LocaleService,
            PolicyKind::LocaleService,
            &tier1_path,
            desired,
        )
        .await
    }

    async fn ensure_deleted(
        &self,
        ctx: &EnsurerContext<'_>,
        state: &mut InfraState,
    ) -> Result<bool> {
        let tier1_path =
            reference_path(state, Slot::Tier1Gateway, PolicyKind::Tier1Gateway, INFRA);
        delete_object(ctx, state, Slot::LocaleService, PolicyKind::LocaleService, tier1_path).await
    }

    fn recovery(&self) -> Option<Recovery<'_>> {
        Some(Recovery::Tagged(self))
    }
}

#[async_trait]
impl RecoverableTask for LocaleServiceTask {
    async fn list_all(
        &self,
        ctx: &EnsurerContext<'_>,
        state: &InfraState,
        cursor: Option<&str>,
    ) -> Result<Page> {
        let tier1_path = required_path(state, Slot::Tier1Gateway)?;
        Ok(ctx
            .policy()
            .list(PolicyKind::LocaleService, &tier1_path, cursor)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EnsureError;
    use crate::remote::PolicyApi;
    use crate::remote::memory::MemoryControlPlane;
    use crate::spec::test_spec;
    use crate::tasks::lookup::LookupTask;

    #[tokio::test]
    async fn test_tier1_requires_tier0() {
        let spec = test_spec();
        let plane = MemoryControlPlane::with_lookups(&spec);
        let ctx = EnsurerContext::new(&plane, &plane, true);
        let mut state = InfraState::default();

        let err = Tier1GatewayTask
            .ensure(&ctx, &spec, &mut state)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EnsureError::MissingDependency {
                slot: Slot::Tier0Gateway
            }
        ));
        assert_eq!(plane.created_count(), 0);
    }

    #[tokio::test]
    async fn test_tier1_and_locale_service() {
        let spec = test_spec();
        let plane = MemoryControlPlane::with_lookups(&spec);
        let ctx = EnsurerContext::new(&plane, &plane, true);
        let mut state = InfraState::default();

        LookupTask::tier0_gateway()
            .ensure(&ctx, &spec, &mut state)
            .await
            .unwrap();
        LookupTask::edge_cluster()
            .ensure(&ctx, &spec, &mut state)
            .await
            .unwrap();

        let action = Tier1GatewayTask
            .ensure(&ctx, &spec, &mut state)
            .await
            .unwrap();
        assert_eq!(action, Action::Created);

        let action = LocaleServiceTask
            .ensure(&ctx, &spec, &mut state)
            .await
            .unwrap();
        assert_eq!(action, Action::Created);

        let tier1_path = state.tier1_gateway_ref.as_ref().unwrap().path.clone().unwrap();
        let locale = state.locale_service_ref.as_ref().unwrap();
        assert_eq!(locale.id, LOCALE_SERVICE_ID);
        assert_eq!(
            locale.path.as_deref(),
            Some(format!("{}/locale-services/default", tier1_path).as_str())
        );

        let tier1 = PolicyApi::get(&plane, &tier1_path).await.unwrap();
        assert_eq!(tier1.display_name, "dev--shoot-a");
        assert!(tier1.has_tags(&spec.create_tags()));
    }
}
