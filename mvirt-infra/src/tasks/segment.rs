//! Workers segment attached to the tier-1 gateway.

use async_trait::async_trait;
use serde_json::json;

use super::policy::{delete_object, ensure_object, required_path};
use super::{Action, RecoverableTask, Recovery, Task};
use crate::context::EnsurerContext;
use crate::error::Result;
use crate::remote::{INFRA, Page, PolicyKind, RemoteObject};
use crate::spec::InfraSpec;
use crate::state::{InfraState, Slot};

pub struct SegmentTask;

#[async_trait]
impl Task for SegmentTask {
    fn label(&self) -> &'static str {
        "segment"
    }

    fn slot(&self) -> Slot {
        Slot::Segment
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
        let transport_zone_path = required_path(state, Slot::TransportZone)?;
        let desired = RemoteObject::new("", spec.full_cluster_name())
            .with_tags(spec.create_tags())
            .with_property("connectivity_path", tier1_path)
            .with_property("transport_zone_path", transport_zone_path)
            .with_property(
                "subnets",
                json!([{ "gateway_address": spec.gateway_cidr() }]),
            );
        ensure_object(ctx, state, Slot::Segment, PolicyKind::Segment, INFRA, desired).await
    }

    async fn ensure_deleted(
        &self,
        ctx: &EnsurerContext<'_>,
        state: &mut InfraState,
    ) -> Result<bool> {
        let parent = Ok(INFRA.to_string());
        delete_object(ctx, state, Slot::Segment, PolicyKind::Segment, parent).await
    }

    fn recovery(&self) -> Option<Recovery<'_>> {
        Some(Recovery::Tagged(self))
    }
}

#[async_trait]
impl RecoverableTask for SegmentTask {
    async fn list_all(
        &self,
        ctx: &EnsurerContext<'_>,
        _state: &InfraState,
        cursor: Option<&str>,
    ) -> Result<Page> {
        Ok(ctx.policy().list(PolicyKind::Segment, INFRA, cursor).await?)
    }
}
