//! Request-scoped capabilities handed to every task call.

use crate::remote::{ManagerApi, PolicyApi};

/// Client handles and flags for one ensure or delete run.
///
/// Built by the ensurer per call and passed by reference; tasks must not keep it.
pub struct EnsurerContext<'a> {
    policy: &'a dyn PolicyApi,
    manager: &'a dyn ManagerApi,
    try_recover: bool,
}

impl<'a> EnsurerContext<'a> {
    pub fn new(policy: &'a dyn PolicyApi, manager: &'a dyn ManagerApi, try_recover: bool) -> Self {
        Self {
            policy,
            manager,
            try_recover,
        }
    }

    pub fn policy(&self) -> &'a dyn PolicyApi {
        self.policy
    }

    pub fn manager(&self) -> &'a dyn ManagerApi {
        self.manager
    }

    pub fn is_try_recover_enabled(&self) -> bool {
        self.try_recover
    }
}
