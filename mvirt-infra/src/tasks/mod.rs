//! Tasks: one unit of idempotent work per remote resource.
//!
//! Each task ensures (creates, verifies or updates) its object, deletes it,
//! and exposes the reference it keeps in [`InfraState`]. Tasks whose resource
//! type supports a tag search additionally offer recovery of lost references
//! through [`Task::recovery`].

pub mod dhcp;
pub mod lookup;
pub mod policy;
pub mod segment;
pub mod snat;
pub mod tier1;

use std::fmt;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::context::EnsurerContext;
use crate::error::Result;
use crate::remote::{Page, RemoteObject, Tag};
use crate::spec::InfraSpec;
use crate::state::{InfraState, Reference, Slot};

/// Outcome of a successful [`Task::ensure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Created,
    Updated,
    Unchanged,
    /// A pre-existing object was looked up.
    Found,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Created => "created",
            Action::Updated => "updated",
            Action::Unchanged => "unchanged",
            Action::Found => "found",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait for infrastructure tasks.
#[async_trait]
pub trait Task: Send + Sync {
    /// Stable identity used in logs and wrapped errors.
    fn label(&self) -> &'static str;

    /// State slot holding this task's reference.
    fn slot(&self) -> Slot;

    /// Name of the remote object, for logging only.
    fn name_to_log(&self, spec: &InfraSpec) -> Option<String>;

    fn reference<'s>(&self, state: &'s InfraState) -> Option<&'s Reference> {
        state.reference(self.slot())
    }

    /// Make the remote object match `spec`, recording its reference in `state`.
    async fn ensure(
        &self,
        ctx: &EnsurerContext<'_>,
        spec: &InfraSpec,
        state: &mut InfraState,
    ) -> Result<Action>;

    /// Delete the remote object if referenced. Returns whether something was deleted.
    async fn ensure_deleted(&self, ctx: &EnsurerContext<'_>, state: &mut InfraState)
    -> Result<bool>;

    /// Recovery strategy, if the resource type supports a tag search.
    fn recovery(&self) -> Option<Recovery<'_>> {
        None
    }
}

/// How a task restores a lost reference.
pub enum Recovery<'a> {
    /// List objects and filter by the per-task tag set.
    Tagged(&'a dyn RecoverableTask),
    /// Search manager objects by the common tag set.
    Advanced(&'a dyn RecoverableAdvancedTask),
}

/// Task whose objects can be listed and matched by tags.
#[async_trait]
pub trait RecoverableTask: Task {
    /// One page of candidate objects.
    async fn list_all(
        &self,
        ctx: &EnsurerContext<'_>,
        state: &InfraState,
        cursor: Option<&str>,
    ) -> Result<Page>;

    fn set_recovered_reference(&self, state: &mut InfraState, object: &RemoteObject) {
        state.set(self.slot(), Reference::from_object(object));
    }
}

/// Task recovering through the manager API tag search.
#[async_trait]
pub trait RecoverableAdvancedTask: Task {
    /// Restore the reference if exactly one object carries `tags`.
    async fn try_recover(
        &self,
        ctx: &EnsurerContext<'_>,
        state: &mut InfraState,
        tags: &[Tag],
    ) -> Result<bool>;
}

/// Page through all objects of `task` and restore its reference if exactly one
/// carries every tag in `tags`. The remote side is never modified.
pub async fn try_recover(
    ctx: &EnsurerContext<'_>,
    state: &mut InfraState,
    task: &dyn RecoverableTask,
    tags: &[Tag],
) -> Result<bool> {
    let mut matches = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = task.list_all(ctx, state, cursor.as_deref()).await?;
        matches.extend(page.results.into_iter().filter(|o| o.has_tags(tags)));
        match page.cursor {
            Some(next) if !next.is_empty() => cursor = Some(next),
            _ => break,
        }
    }
    Ok(restore_unique(state, task.label(), matches, |state, object| {
        task.set_recovered_reference(state, object)
    }))
}

/// Apply the single match, or leave the state alone when there is none or several.
pub(crate) fn restore_unique(
    state: &mut InfraState,
    label: &str,
    matches: Vec<RemoteObject>,
    set: impl FnOnce(&mut InfraState, &RemoteObject),
) -> bool {
    match matches.as_slice() {
        [object] => {
            set(state, object);
            info!(task = label, id = %object.id, "Reference recovered");
            true
        }
        [] => {
            debug!(task = label, "Nothing to recover");
            false
        }
        many => {
            info!(
                task = label,
                count = many.len(),
                "Recovery ambiguous, multiple objects carry the tags"
            );
            false
        }
    }
}

/// The ordered task list. Order follows remote dependencies: every task only
/// refers to objects of tasks before it.
pub fn default_tasks() -> Vec<Box<dyn Task>> {
    vec![
        Box::new(lookup::LookupTask::tier0_gateway()),
        Box::new(lookup::LookupTask::transport_zone()),
        Box::new(lookup::LookupTask::edge_cluster()),
        Box::new(lookup::LookupTask::snat_ip_pool()),
        Box::new(tier1::Tier1GatewayTask),
        Box::new(tier1::LocaleServiceTask),
        Box::new(segment::SegmentTask),
        Box::new(snat::SnatIpAllocationTask),
        Box::new(snat::SnatIpRealizationTask),
        Box::new(snat::SnatRuleTask),
        Box::new(dhcp::LookupLogicalSwitchTask),
        Box::new(dhcp::DhcpProfileTask),
        Box::new(dhcp::DhcpServerTask),
        Box::new(dhcp::DhcpPortTask),
        Box::new(dhcp::DhcpIpPoolTask),
    ]
}
