use crate::error::OracleError;
use crate::permission::PermissionKey;
use crate::types::{ResolutionContext, UserId};
use async_trait::async_trait;
use std::collections::HashSet;

/// Direct permission check collaborator.
///
/// Supplied by the surrounding application and backed by whatever store
/// holds users, roles, and permissions. This is the engine's sole I/O
/// boundary; it may be slow and must be safe to call concurrently.
#[async_trait]
pub trait PermissionOracle: Send + Sync {
    /// Returns whether the user directly holds the exact permission.
    async fn has_permission(
        &self,
        user: &UserId,
        key: &PermissionKey,
        ctx: &ResolutionContext,
    ) -> std::result::Result<bool, OracleError>;
}

/// Oracle that denies everything.
///
/// Explicit stand-in for "no permission backend wired yet"; keeps the
/// deny-by-default path visible instead of hiding it in a closure.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysDenyOracle;

#[async_trait]
impl PermissionOracle for AlwaysDenyOracle {
    async fn has_permission(
        &self,
        _user: &UserId,
        _key: &PermissionKey,
        _ctx: &ResolutionContext,
    ) -> std::result::Result<bool, OracleError> {
        Ok(false)
    }
}

/// Policy consulted before any resolution stage.
///
/// A bypass grants unconditionally. Kept as a separate, auditable object
/// so the "skip every check" path can be disabled per environment.
pub trait OverridePolicy: Send + Sync {
    /// Returns whether the user bypasses all permission checks.
    fn bypass(&self, user: &UserId) -> bool;
}

/// Override policy that never bypasses. The default.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOverride;

impl OverridePolicy for NoOverride {
    fn bypass(&self, _user: &UserId) -> bool {
        false
    }
}

/// Override policy granting a fixed set of super-admin users everything.
#[derive(Debug, Default, Clone)]
pub struct SuperAdminOverride {
    admins: HashSet<UserId>,
}

impl SuperAdminOverride {
    /// Creates a policy from a list of super-admin users.
    pub fn new(admins: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            admins: admins.into_iter().collect(),
        }
    }
}

impl OverridePolicy for SuperAdminOverride {
    fn bypass(&self, user: &UserId) -> bool {
        self.admins.contains(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    #[test]
    fn always_deny_should_deny() {
        let user = UserId::try_from("user_1").unwrap();
        let key = PermissionKey::parse("documents:read").unwrap();
        let granted = block_on(AlwaysDenyOracle.has_permission(
            &user,
            &key,
            &ResolutionContext::new(),
        ))
        .unwrap();
        assert!(!granted);
    }

    #[test]
    fn super_admin_override_should_only_match_listed_users() {
        let admin = UserId::try_from("root_1").unwrap();
        let policy = SuperAdminOverride::new([admin.clone()]);
        assert!(policy.bypass(&admin));
        assert!(!policy.bypass(&UserId::try_from("user_1").unwrap()));
        assert!(!NoOverride.bypass(&admin));
    }
}
