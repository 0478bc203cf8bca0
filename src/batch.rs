use crate::cache::{CachedDecision, DecisionCache};
use crate::engine::{DenyReason, Engine, Resolution};
use crate::error::OracleError;
use crate::oracle::PermissionOracle;
use crate::permission::PermissionKey;
use crate::store::RoleSource;
use crate::types::{Action, ResolutionContext, ResourceName, RoleId, TenantId, UserId};
use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Instant;

/// One requested check inside a batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PermissionCheck {
    /// Resource the action targets.
    pub resource: ResourceName,
    /// Action to check.
    pub action: Action,
    /// Specific resource instance, if any.
    pub resource_id: Option<String>,
}

impl PermissionCheck {
    /// Creates an unscoped check.
    pub fn new(resource: ResourceName, action: Action) -> Self {
        Self {
            resource,
            action,
            resource_id: None,
        }
    }

    fn key(&self) -> PermissionKey {
        let key = PermissionKey::new(self.resource.clone(), self.action.clone());
        match &self.resource_id {
            Some(id) => key.with_resource_id(id.clone()),
            None => key,
        }
    }
}

/// Oracle backed by a pre-fetched set of held permissions.
///
/// Lets the batch path reuse the exact stage chain of a single check
/// without touching the store once per check.
struct HeldSetOracle {
    held: HashSet<PermissionKey>,
}

#[async_trait]
impl PermissionOracle for HeldSetOracle {
    async fn has_permission(
        &self,
        _user: &UserId,
        key: &PermissionKey,
        _ctx: &ResolutionContext,
    ) -> std::result::Result<bool, OracleError> {
        Ok(self.held.contains(key))
    }
}

async fn fetch_held_set(
    roles: &dyn RoleSource,
    user: &UserId,
    tenant: Option<&TenantId>,
) -> std::result::Result<(Vec<RoleId>, HashSet<PermissionKey>), OracleError> {
    let role_ids = roles.user_roles(user, tenant).await?;
    let permissions = roles.role_permissions(&role_ids).await?;
    Ok((role_ids, permissions.into_iter().collect()))
}

impl<O, C> Engine<O, C>
where
    O: PermissionOracle,
    C: DecisionCache,
{
    /// Resolves many checks for one user in one pass, preserving input order.
    ///
    /// Cached checks are answered from one batched cache read. For the
    /// rest, the user's roles and their permissions are fetched once and
    /// every check is evaluated against that held set through the same
    /// implication and dependency-graph rules a single check uses, so the
    /// results match per-check resolution whenever the oracle and the role
    /// source agree on what the user holds. Without a configured role
    /// source each uncached check falls back to a full resolution.
    pub async fn check_many(
        &self,
        user: &UserId,
        checks: &[PermissionCheck],
        tenant: Option<&TenantId>,
    ) -> Vec<Resolution> {
        let start = Instant::now();

        self.flush_if_due().await;

        if self.override_policy.bypass(user) {
            return checks
                .iter()
                .map(|_| {
                    self.record(Resolution {
                        granted: true,
                        cache_hit: false,
                        resolution_time: start.elapsed(),
                        reason: None,
                        dependency_chain: Vec::new(),
                    })
                })
                .collect();
        }

        let mut ctx = ResolutionContext::new();
        if let Some(tenant) = tenant {
            ctx.tenant = Some(tenant.clone());
        }

        let mut results: Vec<Option<Resolution>> = Vec::with_capacity(checks.len());
        let mut uncached: Vec<usize> = Vec::new();

        for (index, check) in checks.iter().enumerate() {
            let key = self.effective_key(&check.key(), &ctx);
            let cache_key = Self::cache_key(user, &key, &ctx);
            match self.cache.get(&cache_key).await {
                Some(hit) => results.push(Some(self.record(Resolution {
                    granted: hit.granted,
                    cache_hit: true,
                    resolution_time: start.elapsed(),
                    reason: (!hit.granted).then_some(DenyReason::NotGranted),
                    dependency_chain: hit.dependencies,
                }))),
                None => {
                    results.push(None);
                    uncached.push(index);
                }
            }
        }

        if uncached.is_empty() {
            return results.into_iter().flatten().collect();
        }

        match &self.roles {
            Some(roles) => {
                let (role_ids, held) = match fetch_held_set(roles.as_ref(), user, tenant).await {
                    Ok(fetched) => fetched,
                    Err(error) => {
                        tracing::warn!(%user, %error, "role fetch failed; denying batch");
                        for index in uncached {
                            results[index] = Some(self.record(Resolution {
                                granted: false,
                                cache_hit: false,
                                resolution_time: start.elapsed(),
                                reason: Some(DenyReason::OracleFailure),
                                dependency_chain: Vec::new(),
                            }));
                        }
                        return results.into_iter().flatten().collect();
                    }
                };
                let role_tags: Vec<String> = role_ids
                    .iter()
                    .map(|role| format!("role:{role}"))
                    .collect();
                let set_oracle = HeldSetOracle { held };

                for index in uncached {
                    let key = self.effective_key(&checks[index].key(), &ctx);
                    let resolution = self
                        .resolve_against_set(user, &key, &ctx, &set_oracle, &role_tags, start)
                        .await;
                    results[index] = Some(resolution);
                }
            }
            None => {
                for index in uncached {
                    let key = checks[index].key();
                    results[index] = Some(self.check_permission(user, &key, &ctx).await);
                }
            }
        }

        results.into_iter().flatten().collect()
    }

    async fn resolve_against_set(
        &self,
        user: &UserId,
        key: &PermissionKey,
        ctx: &ResolutionContext,
        set_oracle: &HeldSetOracle,
        role_tags: &[String],
        start: Instant,
    ) -> Resolution {
        let canonical = key.canonical();

        let outcome = if set_oracle.held.contains(key) {
            (true, vec![canonical], false)
        } else if let Ok(Some(matched)) =
            crate::permission::resolve_implied(set_oracle, user, key, ctx).await
        {
            (true, vec![canonical, matched.canonical()], false)
        } else {
            match self.graph.resolve(user, key, set_oracle, ctx).await {
                Ok(graph_result) if graph_result.granted => (true, graph_result.path, false),
                Ok(graph_result) => (false, Vec::new(), graph_result.cycle_detected),
                Err(_) => (false, Vec::new(), false),
            }
        };
        let (granted, chain, cycle) = outcome;

        if !cycle {
            let mut tags = Self::build_tags(user, key, ctx, &chain);
            tags.extend_from_slice(role_tags);
            self.cache
                .set(
                    Self::cache_key(user, key, ctx),
                    CachedDecision {
                        granted,
                        dependencies: chain.clone(),
                    },
                    self.cache_ttl,
                    tags,
                )
                .await;
        }

        let reason = if granted {
            None
        } else if cycle {
            Some(DenyReason::CircularDependency)
        } else {
            Some(DenyReason::NotGranted)
        };

        self.record(Resolution {
            granted,
            cache_hit: false,
            resolution_time: start.elapsed(),
            reason,
            dependency_chain: chain,
        })
    }
}
