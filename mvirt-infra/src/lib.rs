//! mvirt-infra: ensures the edge network of a cluster on an SDN control plane.
//!
//! An [`InfraEnsurer`] runs a fixed, ordered list of [`tasks`] against the
//! policy and manager APIs. Every task owns one reference in [`InfraState`],
//! which the caller persists between runs.

pub mod context;
pub mod ensurer;
pub mod error;
pub mod remote;
pub mod spec;
pub mod state;
pub mod tasks;

pub use ensurer::InfraEnsurer;
pub use error::{ApiError, EnsureError};
pub use spec::InfraSpec;
pub use state::{InfraState, Reference};
