//! Error types for remote calls and the ensure pipeline.

use thiserror::Error;

use crate::state::Slot;

/// Errors returned by the control plane clients.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Object (or its parent) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Request rejected because of a dependent or conflicting object.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Any other non-success HTTP status.
    #[error("request failed with status {code}: {message}")]
    Status { code: u16, message: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Failure injected by the in-memory control plane.
    #[error("injected failure: {0}")]
    Injected(String),
}

impl ApiError {
    /// Whether the remote side reported the object as absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound(_))
    }
}

/// Errors produced while ensuring or deleting infrastructure.
#[derive(Debug, Error)]
pub enum EnsureError {
    #[error("remote API call failed: {0}")]
    Remote(#[from] ApiError),

    /// A stored reference no longer resolves on the remote side. The slot has
    /// been cleared so that the next reconcile recovers or re-creates it.
    #[error("{slot} reference {id} no longer exists")]
    Consistency { slot: Slot, id: String },

    #[error("{kind} {name:?} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("{slot} reference missing")]
    MissingDependency { slot: Slot },

    #[error("{what} not realized yet")]
    NotRealized { what: String },

    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    #[error("{label} failed")]
    Task {
        label: &'static str,
        #[source]
        source: Box<EnsureError>,
    },

    #[error("deleting {label} failed")]
    Delete {
        label: &'static str,
        #[source]
        source: Box<EnsureError>,
    },
}

impl EnsureError {
    /// Label of the task that failed, if this is a wrapped task error.
    pub fn label(&self) -> Option<&'static str> {
        match self {
            EnsureError::Task { label, .. } | EnsureError::Delete { label, .. } => Some(*label),
            _ => None,
        }
    }

    /// The innermost error, unwrapping task wrappers.
    pub fn root(&self) -> &EnsureError {
        match self {
            EnsureError::Task { source, .. } | EnsureError::Delete { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Result type for the ensure pipeline.
pub type Result<T> = std::result::Result<T, EnsureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapped_error_exposes_label_and_root() {
        let err = EnsureError::Task {
            label: "segment",
            source: Box::new(EnsureError::MissingDependency {
                slot: Slot::Tier1Gateway,
            }),
        };

        assert_eq!(err.label(), Some("segment"));
        assert_eq!(err.to_string(), "segment failed");
        assert!(matches!(
            err.root(),
            EnsureError::MissingDependency {
                slot: Slot::Tier1Gateway
            }
        ));
    }

    #[test]
    fn test_not_found_detection() {
        assert!(ApiError::NotFound("/infra/tier-1s/x".into()).is_not_found());
        assert!(!ApiError::Conflict("busy".into()).is_not_found());
    }
}
