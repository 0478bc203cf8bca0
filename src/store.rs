use crate::error::OracleError;
use crate::permission::PermissionKey;
use crate::types::{RoleId, TenantId, UserId};
use async_trait::async_trait;

/// Bulk role lookup interface, consumed only by the batch checker.
///
/// Lets one batch of checks amortize the role and role-permission fetches
/// instead of going through the oracle once per check.
#[async_trait]
pub trait RoleSource: Send + Sync {
    /// Returns roles assigned to a user, optionally scoped to a tenant.
    async fn user_roles(
        &self,
        user: &UserId,
        tenant: Option<&TenantId>,
    ) -> std::result::Result<Vec<RoleId>, OracleError>;

    /// Returns the permissions bound to a set of roles, in one pass.
    async fn role_permissions(
        &self,
        roles: &[RoleId],
    ) -> std::result::Result<Vec<PermissionKey>, OracleError>;
}

/// Role membership lookup, consumed by cascade invalidation.
#[async_trait]
pub trait RoleDirectory: Send + Sync {
    /// Returns every user currently holding the role.
    async fn role_members(&self, role: &RoleId)
    -> std::result::Result<Vec<UserId>, OracleError>;
}
