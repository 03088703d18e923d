use crate::relay::config::{ALLOWED_ROLE_ID, ALLOWED_USER_ID, ConfigProvider};
use crate::relay::types::{CommandEvent, RoleId, UserId};

/// Decides whether an invoker may trigger privileged operations
pub trait Authorizer: Send + Sync {
    fn is_allowed(&self, event: &CommandEvent) -> bool;
}

/// Static allow-list policy, fixed for the process lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizationPolicy {
    pub allowed_user_id: Option<UserId>,
    pub allowed_role_id: Option<RoleId>,
}

impl AuthorizationPolicy {
    pub fn new(allowed_user_id: Option<UserId>, allowed_role_id: Option<RoleId>) -> Self {
        Self {
            allowed_user_id,
            allowed_role_id,
        }
    }

    pub fn from_config(config: &dyn ConfigProvider) -> Self {
        Self::new(config.get(ALLOWED_USER_ID), config.get(ALLOWED_ROLE_ID))
    }
}

impl Authorizer for AuthorizationPolicy {
    // First match wins: user id, then role, then the administrator flag.
    fn is_allowed(&self, event: &CommandEvent) -> bool {
        let invoker = &event.invoker;

        if self
            .allowed_user_id
            .as_ref()
            .is_some_and(|user_id| *user_id == invoker.user_id)
        {
            return true;
        }

        if self
            .allowed_role_id
            .as_ref()
            .is_some_and(|role_id| invoker.role_ids.contains(role_id))
        {
            return true;
        }

        invoker.administrator
    }
}
