//! Orchestrates the task list against the control plane.
//!
//! Reconcile walks the tasks in order and stops at the first failure, leaving
//! everything created so far in place and referenced in the state. Deletion
//! walks them in reverse, so children always go before their parents.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::context::EnsurerContext;
use crate::error::{EnsureError, Result};
use crate::remote::{ManagerApi, PolicyApi};
use crate::spec::InfraSpec;
use crate::state::InfraState;
use crate::tasks::{self, Recovery, Task, default_tasks};

/// Infrastructure ensurer for one control plane.
pub struct InfraEnsurer {
    policy: Arc<dyn PolicyApi>,
    manager: Arc<dyn ManagerApi>,
    tasks: Vec<Box<dyn Task>>,
    try_recover: bool,
}

impl InfraEnsurer {
    pub fn new(policy: Arc<dyn PolicyApi>, manager: Arc<dyn ManagerApi>) -> Self {
        Self {
            policy,
            manager,
            tasks: default_tasks(),
            try_recover: true,
        }
    }

    /// Replace the task list.
    pub fn with_tasks(mut self, tasks: Vec<Box<dyn Task>>) -> Self {
        self.tasks = tasks;
        self
    }

    /// Enable or disable recovery of lost references (enabled by default).
    pub fn try_recover(mut self, enabled: bool) -> Self {
        self.try_recover = enabled;
        self
    }

    pub fn tasks(&self) -> &[Box<dyn Task>] {
        &self.tasks
    }

    fn context(&self) -> EnsurerContext<'_> {
        EnsurerContext::new(self.policy.as_ref(), self.manager.as_ref(), self.try_recover)
    }

    /// Create or update all infrastructure described by `spec`.
    ///
    /// `state` is updated after every task, also when a later task fails;
    /// callers should persist it either way.
    pub async fn ensure_infrastructure(
        &self,
        spec: &InfraSpec,
        state: &mut InfraState,
    ) -> Result<()> {
        spec.validate()?;
        let ctx = self.context();

        for task in &self.tasks {
            let task = task.as_ref();
            if let Err(e) = recover(&ctx, spec, state, task, false).await {
                warn!(task = task.label(), error = %e, "Recovery failed");
            }

            let action = task
                .ensure(&ctx, spec, state)
                .await
                .map_err(|e| EnsureError::Task {
                    label: task.label(),
                    source: Box::new(e),
                })?;

            // absent name or id leaves the field out
            let name = task.name_to_log(spec);
            let id = task.reference(state).map(|r| r.id.as_str());
            info!(
                task = task.label(),
                name = name.as_deref(),
                id,
                "{} {}",
                task.label(),
                action
            );
        }

        Ok(())
    }

    /// Delete all infrastructure referenced by `state`.
    ///
    /// With a `spec`, lost references are recovered first so that nothing
    /// created earlier is left behind. Without one, only what `state`
    /// references is deleted.
    pub async fn ensure_infrastructure_deleted(
        &self,
        spec: Option<&InfraSpec>,
        state: &mut InfraState,
    ) -> Result<()> {
        let ctx = self.context();

        if let Some(spec) = spec {
            // recovery needs creation order: later lookups depend on earlier references
            for task in &self.tasks {
                let task = task.as_ref();
                if let Err(e) = recover(&ctx, spec, state, task, true).await {
                    info!(task = task.label(), error = %e, "try recover failed");
                }
            }
        }

        for task in self.tasks.iter().rev() {
            let task = task.as_ref();
            let deleted = task
                .ensure_deleted(&ctx, state)
                .await
                .map_err(|e| EnsureError::Delete {
                    label: task.label(),
                    source: Box::new(e),
                })?;
            if deleted {
                info!(task = task.label(), "{} deleted", task.label());
            }
        }

        Ok(())
    }
}

/// Restore a lost reference of `task`.
///
/// Does nothing if recovery is disabled or the slot is already filled. Tasks
/// without a recovery strategy are ensured instead when `lookup` is set.
async fn recover(
    ctx: &EnsurerContext<'_>,
    spec: &InfraSpec,
    state: &mut InfraState,
    task: &dyn Task,
    lookup: bool,
) -> Result<()> {
    if !ctx.is_try_recover_enabled() || task.reference(state).is_some() {
        return Ok(());
    }

    match task.recovery() {
        Some(Recovery::Tagged(recoverable)) => {
            tasks::try_recover(ctx, state, recoverable, &spec.create_tags()).await?;
        }
        Some(Recovery::Advanced(recoverable)) => {
            recoverable
                .try_recover(ctx, state, &spec.create_common_tags())
                .await?;
        }
        None if lookup => {
            let action = task.ensure(ctx, spec, state).await?;
            debug!(task = task.label(), %action, "Looked up for recovery");
        }
        None => {}
    }
    Ok(())
}
