//! Shared ensure/delete logic for policy API objects.

use tracing::debug;
use uuid::Uuid;

use super::Action;
use crate::context::EnsurerContext;
use crate::error::{EnsureError, Result};
use crate::remote::{PolicyKind, RemoteObject};
use crate::state::{InfraState, Reference, Slot};

/// Path of the object referenced by `slot`, or a missing-dependency error.
pub(crate) fn required_path(state: &InfraState, slot: Slot) -> Result<String> {
    state
        .reference(slot)
        .and_then(|r| r.path.clone())
        .ok_or(EnsureError::MissingDependency { slot })
}

/// Path of the object referenced by `slot`, rebuilt from its id below `parent`
/// when the state only holds the id.
pub(crate) fn reference_path(
    state: &InfraState,
    slot: Slot,
    kind: PolicyKind,
    parent: &str,
) -> Result<String> {
    state
        .reference(slot)
        .map(|r| r.path.clone().unwrap_or_else(|| kind.path(parent, &r.id)))
        .ok_or(EnsureError::MissingDependency { slot })
}

/// Id of the object referenced by `slot`, or a missing-dependency error.
pub(crate) fn required_id(state: &InfraState, slot: Slot) -> Result<String> {
    state
        .reference(slot)
        .map(|r| r.id.clone())
        .ok_or(EnsureError::MissingDependency { slot })
}

/// Verify, update or create the object of `slot` below `parent`.
///
/// A new object gets `desired.id` if set, a random UUID otherwise.
pub(crate) async fn ensure_object(
    ctx: &EnsurerContext<'_>,
    state: &mut InfraState,
    slot: Slot,
    kind: PolicyKind,
    parent: &str,
    mut desired: RemoteObject,
) -> Result<Action> {
    if let Some(reference) = state.reference(slot).cloned() {
        let path = reference
            .path
            .clone()
            .unwrap_or_else(|| kind.path(parent, &reference.id));
        return match ctx.policy().get(&path).await {
            Ok(mut existing) => {
                if existing.matches(&desired) {
                    return Ok(Action::Unchanged);
                }
                existing.apply(&desired);
                let updated = ctx.policy().patch(kind, parent, &existing).await?;
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

    if desired.id.is_empty() {
        desired.id = Uuid::new_v4().to_string();
    }
    let created = ctx.policy().patch(kind, parent, &desired).await?;
    state.set(slot, Reference::from_object(&created));
    Ok(Action::Created)
}

/// Delete the object of `slot`; an already missing object counts as deleted.
///
/// `parent` is only consulted when the reference carries no path.
pub(crate) async fn delete_object(
    ctx: &EnsurerContext<'_>,
    state: &mut InfraState,
    slot: Slot,
    kind: PolicyKind,
    parent: Result<String>,
) -> Result<bool> {
    let Some(reference) = state.reference(slot).cloned() else {
        return Ok(false);
    };
    let path = match reference.path {
        Some(path) => path,
        None => kind.path(&parent?, &reference.id),
    };

    match ctx.policy().delete(&path).await {
        Ok(()) => {}
        Err(e) if e.is_not_found() => debug!(path = %path, "Already deleted"),
        Err(e) => return Err(e.into()),
    }
    state.clear(slot);
    Ok(true)
}
