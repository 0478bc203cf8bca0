use crate::error::OracleError;
use crate::oracle::PermissionOracle;
use crate::permission::PermissionKey;
use crate::store::{RoleDirectory, RoleSource};
use crate::types::{ResolutionContext, RoleId, TenantId, UserId};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

/// In-memory permission store for tests and demos.
///
/// Implements [`PermissionOracle`], [`RoleSource`] and [`RoleDirectory`]
/// over one dataset, so batched and individual checks see the same
/// grants. Tenant-agnostic: role assignments answer for any tenant.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    // Grants held directly, outside any role. Instance-scoped grants
    // keep their resource id in the key.
    direct: RwLock<HashMap<UserId, HashSet<PermissionKey>>>,
    user_roles: RwLock<HashMap<UserId, HashSet<RoleId>>>,
    role_permissions: RwLock<HashMap<RoleId, HashSet<PermissionKey>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants a permission directly to a user.
    pub fn add_grant(&self, user: UserId, permission: PermissionKey) {
        let mut guard = self.inner.direct.write().expect("poisoned lock");
        guard.entry(user).or_default().insert(permission);
    }

    /// Removes a direct grant from a user.
    pub fn remove_grant(&self, user: &UserId, permission: &PermissionKey) {
        let mut guard = self.inner.direct.write().expect("poisoned lock");
        if let Some(grants) = guard.get_mut(user) {
            grants.remove(permission);
        }
    }

    /// Assigns a role to a user.
    pub fn add_user_role(&self, user: UserId, role: RoleId) {
        let mut guard = self.inner.user_roles.write().expect("poisoned lock");
        guard.entry(user).or_default().insert(role);
    }

    /// Removes a role from a user.
    pub fn remove_user_role(&self, user: &UserId, role: &RoleId) {
        let mut guard = self.inner.user_roles.write().expect("poisoned lock");
        if let Some(roles) = guard.get_mut(user) {
            roles.remove(role);
        }
    }

    /// Adds a permission to a role.
    pub fn add_role_permission(&self, role: RoleId, permission: PermissionKey) {
        let mut guard = self.inner.role_permissions.write().expect("poisoned lock");
        guard.entry(role).or_default().insert(permission);
    }

    /// Removes a permission from a role.
    pub fn remove_role_permission(&self, role: &RoleId, permission: &PermissionKey) {
        let mut guard = self.inner.role_permissions.write().expect("poisoned lock");
        if let Some(perms) = guard.get_mut(role) {
            perms.remove(permission);
        }
    }

    fn holds(&self, user: &UserId, key: &PermissionKey) -> bool {
        let direct = self.inner.direct.read().expect("poisoned lock");
        if direct
            .get(user)
            .is_some_and(|grants| grants.contains(key))
        {
            return true;
        }
        drop(direct);

        let roles = self.inner.user_roles.read().expect("poisoned lock");
        let Some(user_roles) = roles.get(user) else {
            return false;
        };
        let permissions = self.inner.role_permissions.read().expect("poisoned lock");
        user_roles.iter().any(|role| {
            permissions
                .get(role)
                .is_some_and(|perms| perms.contains(key))
        })
    }
}

#[async_trait]
impl PermissionOracle for MemoryStore {
    async fn has_permission(
        &self,
        user: &UserId,
        key: &PermissionKey,
        _ctx: &ResolutionContext,
    ) -> std::result::Result<bool, OracleError> {
        Ok(self.holds(user, key))
    }
}

#[async_trait]
impl RoleSource for MemoryStore {
    async fn user_roles(
        &self,
        user: &UserId,
        _tenant: Option<&TenantId>,
    ) -> std::result::Result<Vec<RoleId>, OracleError> {
        let guard = self.inner.user_roles.read().expect("poisoned lock");
        Ok(guard
            .get(user)
            .map(|roles| roles.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn role_permissions(
        &self,
        roles: &[RoleId],
    ) -> std::result::Result<Vec<PermissionKey>, OracleError> {
        let guard = self.inner.role_permissions.read().expect("poisoned lock");
        let mut out = Vec::new();
        for role in roles {
            if let Some(perms) = guard.get(role) {
                out.extend(perms.iter().cloned());
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl RoleDirectory for MemoryStore {
    async fn role_members(
        &self,
        role: &RoleId,
    ) -> std::result::Result<Vec<UserId>, OracleError> {
        let guard = self.inner.user_roles.read().expect("poisoned lock");
        Ok(guard
            .iter()
            .filter(|(_, roles)| roles.contains(role))
            .map(|(user, _)| user.clone())
            .collect())
    }
}
