use crate::error::OracleError;
use crate::oracle::PermissionOracle;
use crate::permission::PermissionKey;
use crate::types::{Action, EntityId, ResolutionContext, ResourceName, UserId};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const DEFAULT_TTL: Duration = Duration::from_secs(300);

fn entity_resource() -> ResourceName {
    ResourceName::from_string("entity".to_string())
}

fn entity_access_key(entity: &EntityId) -> PermissionKey {
    PermissionKey::new(entity_resource(), Action::from_string("access".to_string()))
        .with_resource_id(entity.as_str())
}

fn entity_access_wildcard() -> PermissionKey {
    PermissionKey::new(entity_resource(), Action::from_string("access".to_string()))
        .with_resource_id("*")
}

fn entity_operation_key(entity: &EntityId, operation: &Action) -> PermissionKey {
    PermissionKey::new(entity_resource(), operation.clone()).with_resource_id(entity.as_str())
}

fn role_manage_key() -> PermissionKey {
    PermissionKey::new(
        ResourceName::from_string("roles".to_string()),
        Action::from_string("manage".to_string()),
    )
}

fn cross_entity_key() -> PermissionKey {
    PermissionKey::new(entity_resource(), Action::from_string("cross_manage".to_string()))
}

/// A boundary check request: does this operation on this entity cross an
/// isolation line the user is not allowed to cross?
#[derive(Clone, Debug)]
pub struct BoundaryCheck {
    /// User performing the operation.
    pub user: UserId,
    /// Entity whose boundary is being crossed.
    pub entity: EntityId,
    /// Operation attempted against the entity.
    pub operation: Action,
}

/// A request to grant a permission from one user to another.
#[derive(Clone, Debug)]
pub struct GrantRequest {
    /// User granting the permission.
    pub grantor: UserId,
    /// Entity the grantor belongs to.
    pub grantor_entity: EntityId,
    /// User receiving the permission.
    pub grantee: UserId,
    /// Entity the grantee belongs to.
    pub grantee_entity: EntityId,
    /// Permission being granted. A resource id makes the grant
    /// resource-scoped.
    pub permission: PermissionKey,
}

/// Structured outcome of a grant validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrantDecision {
    /// Whether the grant is allowed.
    pub valid: bool,
    /// Human-readable reason for the first violated rule.
    pub reason: Option<String>,
}

impl GrantDecision {
    fn allowed() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    fn denied(reason: &str) -> Self {
        Self {
            valid: false,
            reason: Some(reason.to_string()),
        }
    }
}

#[derive(Clone, Debug, Hash, Eq, PartialEq)]
struct BoundaryKey {
    user: UserId,
    entity: EntityId,
    operation: Action,
}

#[derive(Clone, Debug, Hash, Eq, PartialEq)]
struct GrantKey {
    grantor: UserId,
    grantee: UserId,
    permission: String,
    resource_id: Option<String>,
    cross_entity: bool,
}

#[derive(Debug, Default)]
struct BoundaryState {
    checks: HashMap<BoundaryKey, (bool, Instant)>,
    grants: HashMap<GrantKey, (GrantDecision, Instant)>,
}

/// Entity/tenant boundary validator with a private TTL cache.
///
/// Both positive and negative outcomes are cached; a cached `false` blocks
/// until the TTL expires or the cache is explicitly cleared. User-scoped
/// invalidation clears this cache through [`BoundaryValidator::clear_user`],
/// the TTL is only a backstop.
#[derive(Debug)]
pub struct BoundaryValidator {
    state: Mutex<BoundaryState>,
    ttl: Duration,
}

impl Default for BoundaryValidator {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl BoundaryValidator {
    /// Creates a validator with the given cache TTL.
    pub fn new(ttl: Duration) -> Self {
        Self {
            state: Mutex::new(BoundaryState::default()),
            ttl,
        }
    }

    /// Validates an entity boundary crossing.
    ///
    /// Allows when the user holds entity access (direct or wildcard) or the
    /// operation-specific entity permission.
    pub async fn validate(
        &self,
        check: &BoundaryCheck,
        oracle: &dyn PermissionOracle,
    ) -> std::result::Result<bool, OracleError> {
        let key = BoundaryKey {
            user: check.user.clone(),
            entity: check.entity.clone(),
            operation: check.operation.clone(),
        };
        let now = Instant::now();

        {
            let state = self.state.lock().expect("poisoned lock");
            if let Some((valid, cached_at)) = state.checks.get(&key)
                && now.saturating_duration_since(*cached_at) <= self.ttl
            {
                return Ok(*valid);
            }
        }

        let ctx = ResolutionContext::new().with_entity(check.entity.clone());
        let valid = oracle
            .has_permission(&check.user, &entity_access_key(&check.entity), &ctx)
            .await?
            || oracle
                .has_permission(&check.user, &entity_access_wildcard(), &ctx)
                .await?
            || oracle
                .has_permission(
                    &check.user,
                    &entity_operation_key(&check.entity, &check.operation),
                    &ctx,
                )
                .await?;

        let mut state = self.state.lock().expect("poisoned lock");
        self.prune_expired(&mut state, now);
        state.checks.insert(key, (valid, now));
        Ok(valid)
    }

    /// Validates a permission grant between two users.
    ///
    /// Rules are checked in order and the first violation short-circuits:
    /// the grantor must hold the permission itself, must hold role
    /// management, needs cross-entity capability when the entities differ,
    /// and needs the resource's manage capability for scoped grants.
    pub async fn validate_grant(
        &self,
        grant: &GrantRequest,
        oracle: &dyn PermissionOracle,
    ) -> std::result::Result<GrantDecision, OracleError> {
        let cross_entity = grant.grantor_entity != grant.grantee_entity;
        let key = GrantKey {
            grantor: grant.grantor.clone(),
            grantee: grant.grantee.clone(),
            permission: grant.permission.canonical(),
            resource_id: grant.permission.resource_id().map(str::to_string),
            cross_entity,
        };
        let now = Instant::now();

        {
            let state = self.state.lock().expect("poisoned lock");
            if let Some((decision, cached_at)) = state.grants.get(&key)
                && now.saturating_duration_since(*cached_at) <= self.ttl
            {
                return Ok(decision.clone());
            }
        }

        let decision = self.evaluate_grant(grant, cross_entity, oracle).await?;
        if !decision.valid {
            tracing::debug!(
                grantor = %grant.grantor,
                grantee = %grant.grantee,
                permission = %grant.permission,
                reason = decision.reason.as_deref().unwrap_or(""),
                "permission grant rejected"
            );
        }

        let mut state = self.state.lock().expect("poisoned lock");
        self.prune_expired(&mut state, now);
        state.grants.insert(key, (decision.clone(), now));
        Ok(decision)
    }

    // Keeps the maps bounded by the TTL; entries past it can never be
    // served again anyway.
    fn prune_expired(&self, state: &mut BoundaryState, now: Instant) {
        state
            .checks
            .retain(|_, cached| now.saturating_duration_since(cached.1) <= self.ttl);
        state
            .grants
            .retain(|_, cached| now.saturating_duration_since(cached.1) <= self.ttl);
    }

    async fn evaluate_grant(
        &self,
        grant: &GrantRequest,
        cross_entity: bool,
        oracle: &dyn PermissionOracle,
    ) -> std::result::Result<GrantDecision, OracleError> {
        let ctx = ResolutionContext::new().with_entity(grant.grantor_entity.clone());

        if !oracle
            .has_permission(&grant.grantor, &grant.permission, &ctx)
            .await?
        {
            return Ok(GrantDecision::denied(
                "Grantor does not hold the permission being granted",
            ));
        }

        if !oracle
            .has_permission(&grant.grantor, &role_manage_key(), &ctx)
            .await?
        {
            return Ok(GrantDecision::denied(
                "Grantor lacks role management capability",
            ));
        }

        if cross_entity
            && !oracle
                .has_permission(&grant.grantor, &cross_entity_key(), &ctx)
                .await?
        {
            return Ok(GrantDecision::denied(
                "Cross-entity permission grant not allowed",
            ));
        }

        if grant.permission.resource_id().is_some() {
            let manage = PermissionKey::new(
                grant.permission.resource().clone(),
                Action::from_string("manage".to_string()),
            );
            if !oracle.has_permission(&grant.grantor, &manage, &ctx).await? {
                return Ok(GrantDecision::denied(
                    "Grantor cannot manage the scoped resource",
                ));
            }
        }

        Ok(GrantDecision::allowed())
    }

    /// Drops every cached validation.
    pub fn clear(&self) {
        let mut state = self.state.lock().expect("poisoned lock");
        state.checks.clear();
        state.grants.clear();
    }

    /// Drops cached validations involving the user, as grantor or subject.
    pub fn clear_user(&self, user: &UserId) {
        let mut state = self.state.lock().expect("poisoned lock");
        state.checks.retain(|key, _| &key.user != user);
        state
            .grants
            .retain(|key, _| &key.grantor != user && &key.grantee != user);
    }

    #[cfg(test)]
    pub(crate) fn cached_entries(&self) -> usize {
        let state = self.state.lock().expect("poisoned lock");
        state.checks.len() + state.grants.len()
    }
}
