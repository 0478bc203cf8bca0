use crate::boundary::{BoundaryCheck, BoundaryValidator, GrantDecision, GrantRequest};
use crate::cache::{CacheStats, CachedDecision, DecisionCache, NoCache};
use crate::error::OracleError;
use crate::graph::DependencyGraph;
use crate::invalidation::{InvalidationEvent, InvalidationScope, Invalidator, apply_events};
use crate::oracle::{NoOverride, OverridePolicy, PermissionOracle};
use crate::permission::{PermissionKey, resolve_implied};
use crate::store::{RoleDirectory, RoleSource};
use crate::types::{EntityId, ResolutionContext, RoleId, UserId};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const DEFAULT_SLOW_THRESHOLD: Duration = Duration::from_millis(100);
const DEFAULT_INVALIDATION_WINDOW: Duration = Duration::from_millis(100);
const DEFAULT_BOUNDARY_TTL: Duration = Duration::from_secs(300);

/// Why a check was denied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DenyReason {
    /// No direct grant, implication, dependency chain, or boundary applied.
    NotGranted,
    /// The dependency graph contains a cycle involving this permission.
    CircularDependency,
    /// The permission oracle failed; denied fail-closed.
    OracleFailure,
}

/// Outcome of a permission check, with observability fields always set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    /// Whether access is granted.
    pub granted: bool,
    /// Whether the result came from the cache.
    pub cache_hit: bool,
    /// Wall time spent resolving.
    pub resolution_time: Duration,
    /// Set iff denied.
    pub reason: Option<DenyReason>,
    /// Canonical keys the decision was derived from.
    pub dependency_chain: Vec<String>,
}

/// Aggregate resolver metrics.
#[derive(Clone, Debug, Default)]
pub struct PerformanceReport {
    /// Total checks served.
    pub resolutions: u64,
    /// Checks answered from cache.
    pub cache_hits: u64,
    /// Mean resolution time.
    pub avg_resolution_time: Duration,
    /// Worst resolution time.
    pub max_resolution_time: Duration,
    /// Checks slower than the configured threshold.
    pub slow_resolutions: u64,
    /// Decision cache counters.
    pub cache: CacheStats,
}

#[derive(Debug, Default)]
struct PerfCounters {
    resolutions: u64,
    cache_hits: u64,
    total: Duration,
    max: Duration,
    slow: u64,
}

pub(crate) struct Outcome {
    pub(crate) granted: bool,
    pub(crate) chain: Vec<String>,
    pub(crate) cycle: bool,
}

/// Permission resolution engine.
///
/// The public entry point for permission checks. Stages run in a fixed
/// order: override policy, cache, direct oracle check, implication table,
/// dependency graph, entity boundary. Every internal failure is
/// converted into a fail-closed denial; callers never see an error from
/// [`Engine::check_permission`].
pub struct Engine<O, C = NoCache> {
    pub(crate) oracle: O,
    pub(crate) cache: C,
    pub(crate) graph: DependencyGraph,
    pub(crate) boundary: BoundaryValidator,
    pub(crate) override_policy: Box<dyn OverridePolicy>,
    pub(crate) roles: Option<Arc<dyn RoleSource>>,
    directory: Option<Arc<dyn RoleDirectory>>,
    invalidator: Invalidator,
    pub(crate) cache_ttl: Option<Duration>,
    slow_threshold: Duration,
    metrics: Mutex<PerfCounters>,
}

/// Builder for [`Engine`].
pub struct EngineBuilder<O, C = NoCache> {
    oracle: O,
    cache: C,
    graph: DependencyGraph,
    boundary_ttl: Duration,
    override_policy: Box<dyn OverridePolicy>,
    roles: Option<Arc<dyn RoleSource>>,
    directory: Option<Arc<dyn RoleDirectory>>,
    invalidation_window: Duration,
    cache_ttl: Option<Duration>,
    slow_threshold: Duration,
}

impl<O> EngineBuilder<O, NoCache> {
    /// Creates a builder with default configuration and the stock
    /// dependency rules.
    pub fn new(oracle: O) -> Self {
        Self {
            oracle,
            cache: NoCache,
            graph: DependencyGraph::with_default_rules(),
            boundary_ttl: DEFAULT_BOUNDARY_TTL,
            override_policy: Box::new(NoOverride),
            roles: None,
            directory: None,
            invalidation_window: DEFAULT_INVALIDATION_WINDOW,
            cache_ttl: None,
            slow_threshold: DEFAULT_SLOW_THRESHOLD,
        }
    }
}

impl<O, C> EngineBuilder<O, C> {
    /// Replaces the dependency graph.
    pub fn graph(mut self, graph: DependencyGraph) -> Self {
        self.graph = graph;
        self
    }

    /// Sets the boundary validator cache TTL.
    pub fn boundary_ttl(mut self, ttl: Duration) -> Self {
        self.boundary_ttl = ttl;
        self
    }

    /// Sets the override policy.
    pub fn override_policy(mut self, policy: impl OverridePolicy + 'static) -> Self {
        self.override_policy = Box::new(policy);
        self
    }

    /// Sets the role source used by batched checks.
    pub fn role_source(mut self, roles: impl RoleSource + 'static) -> Self {
        self.roles = Some(Arc::new(roles));
        self
    }

    /// Sets the role directory used by cascade invalidation.
    pub fn role_directory(mut self, directory: impl RoleDirectory + 'static) -> Self {
        self.directory = Some(Arc::new(directory));
        self
    }

    /// Sets the invalidation batching window.
    pub fn invalidation_window(mut self, window: Duration) -> Self {
        self.invalidation_window = window;
        self
    }

    /// Sets the TTL passed to the decision cache on writes.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Sets the threshold above which a resolution counts as slow.
    pub fn slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = threshold;
        self
    }

    /// Sets the cache implementation.
    pub fn cache<C2: DecisionCache>(self, cache: C2) -> EngineBuilder<O, C2> {
        EngineBuilder {
            oracle: self.oracle,
            cache,
            graph: self.graph,
            boundary_ttl: self.boundary_ttl,
            override_policy: self.override_policy,
            roles: self.roles,
            directory: self.directory,
            invalidation_window: self.invalidation_window,
            cache_ttl: self.cache_ttl,
            slow_threshold: self.slow_threshold,
        }
    }

    /// Builds the engine.
    pub fn build(self) -> Engine<O, C> {
        Engine {
            oracle: self.oracle,
            cache: self.cache,
            graph: self.graph,
            boundary: BoundaryValidator::new(self.boundary_ttl),
            override_policy: self.override_policy,
            roles: self.roles,
            directory: self.directory,
            invalidator: Invalidator::new(self.invalidation_window),
            cache_ttl: self.cache_ttl,
            slow_threshold: self.slow_threshold,
            metrics: Mutex::new(PerfCounters::default()),
        }
    }
}

impl<O, C> Engine<O, C>
where
    O: PermissionOracle,
    C: DecisionCache,
{
    /// Checks whether a user may perform an action on a resource.
    ///
    /// Infallible by contract: collaborator failures are logged and
    /// converted into a denial with [`DenyReason::OracleFailure`].
    pub async fn check_permission(
        &self,
        user: &UserId,
        key: &PermissionKey,
        ctx: &ResolutionContext,
    ) -> Resolution {
        let start = Instant::now();

        self.flush_if_due().await;

        if self.override_policy.bypass(user) {
            return self.record(Resolution {
                granted: true,
                cache_hit: false,
                resolution_time: start.elapsed(),
                reason: None,
                dependency_chain: Vec::new(),
            });
        }

        let key = self.effective_key(key, ctx);
        let cache_key = Self::cache_key(user, &key, ctx);

        if let Some(hit) = self.cache.get(&cache_key).await {
            return self.record(Resolution {
                granted: hit.granted,
                cache_hit: true,
                resolution_time: start.elapsed(),
                reason: (!hit.granted).then_some(DenyReason::NotGranted),
                dependency_chain: hit.dependencies,
            });
        }

        match self.resolve_uncached(user, &key, ctx).await {
            Ok(outcome) => {
                // Cycle denials are configuration bugs; keeping them out of
                // the cache keeps them visible on every check.
                if !outcome.cycle {
                    let tags = Self::build_tags(user, &key, ctx, &outcome.chain);
                    self.cache
                        .set(
                            cache_key,
                            CachedDecision {
                                granted: outcome.granted,
                                dependencies: outcome.chain.clone(),
                            },
                            self.cache_ttl,
                            tags,
                        )
                        .await;
                }

                let reason = if outcome.granted {
                    None
                } else if outcome.cycle {
                    Some(DenyReason::CircularDependency)
                } else {
                    Some(DenyReason::NotGranted)
                };

                self.record(Resolution {
                    granted: outcome.granted,
                    cache_hit: false,
                    resolution_time: start.elapsed(),
                    reason,
                    dependency_chain: outcome.chain,
                })
            }
            Err(error) => {
                tracing::warn!(%user, permission = %key, %error, "oracle failed; denying");
                self.record(Resolution {
                    granted: false,
                    cache_hit: false,
                    resolution_time: start.elapsed(),
                    reason: Some(DenyReason::OracleFailure),
                    dependency_chain: Vec::new(),
                })
            }
        }
    }

    /// Runs the uncached stage chain: direct, implied, graph, boundary.
    pub(crate) async fn resolve_uncached(
        &self,
        user: &UserId,
        key: &PermissionKey,
        ctx: &ResolutionContext,
    ) -> std::result::Result<Outcome, OracleError> {
        let canonical = key.canonical();

        if self.oracle.has_permission(user, key, ctx).await? {
            return Ok(Outcome {
                granted: true,
                chain: vec![canonical],
                cycle: false,
            });
        }

        if let Some(matched) = resolve_implied(&self.oracle, user, key, ctx).await? {
            return Ok(Outcome {
                granted: true,
                chain: vec![canonical, matched.canonical()],
                cycle: false,
            });
        }

        let graph_result = self.graph.resolve(user, key, &self.oracle, ctx).await?;
        if graph_result.granted {
            return Ok(Outcome {
                granted: true,
                chain: graph_result.path,
                cycle: false,
            });
        }

        if let Some(entity) = &ctx.entity {
            let check = BoundaryCheck {
                user: user.clone(),
                entity: entity.clone(),
                operation: key.action().clone(),
            };
            if self.boundary.validate(&check, &self.oracle).await? {
                return Ok(Outcome {
                    granted: true,
                    chain: vec![canonical, "entity:access".to_string()],
                    cycle: false,
                });
            }
        }

        Ok(Outcome {
            granted: false,
            chain: Vec::new(),
            cycle: graph_result.cycle_detected,
        })
    }

    /// Validates a permission grant between two users.
    pub async fn check_grant(&self, grant: &GrantRequest) -> GrantDecision {
        match self.boundary.validate_grant(grant, &self.oracle).await {
            Ok(decision) => decision,
            Err(error) => {
                tracing::warn!(grantor = %grant.grantor, %error, "oracle failed; rejecting grant");
                GrantDecision {
                    valid: false,
                    reason: Some("Permission backend unavailable".to_string()),
                }
            }
        }
    }

    /// Queues an invalidation for one user's cached decisions.
    pub fn invalidate_user(&self, user: UserId, reason: impl Into<String>) {
        self.invalidator.enqueue(InvalidationEvent {
            scope: InvalidationScope::User(user),
            reason: reason.into(),
        });
    }

    /// Queues an invalidation for a role, cascading to every member.
    pub fn invalidate_role(&self, role: RoleId, reason: impl Into<String>) {
        self.invalidator.enqueue(InvalidationEvent {
            scope: InvalidationScope::Role(role),
            reason: reason.into(),
        });
    }

    /// Queues an invalidation for an entity scope.
    pub fn invalidate_entity(&self, entity: EntityId, reason: impl Into<String>) {
        self.invalidator.enqueue(InvalidationEvent {
            scope: InvalidationScope::Entity(entity),
            reason: reason.into(),
        });
    }

    /// Queues a full cache drop.
    pub fn invalidate_all(&self, reason: impl Into<String>) {
        self.invalidator.enqueue(InvalidationEvent {
            scope: InvalidationScope::Global,
            reason: reason.into(),
        });
    }

    /// Flushes the pending batch once its window has elapsed.
    pub(crate) async fn flush_if_due(&self) {
        if self.invalidator.due() {
            self.flush_invalidations().await;
        }
    }

    /// Flushes the pending invalidation batch; returns evicted key count.
    pub async fn flush_invalidations(&self) -> usize {
        let events = self.invalidator.drain();
        if events.is_empty() {
            return 0;
        }
        apply_events(
            events,
            &self.cache,
            self.directory.as_deref(),
            &self.boundary,
        )
        .await
    }

    /// Returns decision cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Returns aggregate resolver metrics.
    pub fn performance_report(&self) -> PerformanceReport {
        let counters = self.metrics.lock().expect("poisoned lock");
        let avg = if counters.resolutions == 0 {
            Duration::ZERO
        } else {
            let nanos = counters.total.as_nanos() / u128::from(counters.resolutions);
            Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
        };
        PerformanceReport {
            resolutions: counters.resolutions,
            cache_hits: counters.cache_hits,
            avg_resolution_time: avg,
            max_resolution_time: counters.max,
            slow_resolutions: counters.slow,
            cache: self.cache.stats(),
        }
    }

    /// Folds the context's resource id into the key when the key has none.
    pub(crate) fn effective_key(&self, key: &PermissionKey, ctx: &ResolutionContext) -> PermissionKey {
        match (&ctx.resource_id, key.resource_id()) {
            (Some(id), None) => key.clone().with_resource_id(id.clone()),
            _ => key.clone(),
        }
    }

    pub(crate) fn cache_key(user: &UserId, key: &PermissionKey, ctx: &ResolutionContext) -> String {
        // '|' cannot appear in validated identifiers, so joins are unambiguous.
        format!(
            "{}|{}|{}|{}|{}",
            user,
            ctx.tenant.as_ref().map_or("-", |t| t.as_str()),
            ctx.entity.as_ref().map_or("-", |e| e.as_str()),
            key.canonical(),
            key.resource_id().unwrap_or("-"),
        )
    }

    pub(crate) fn build_tags(
        user: &UserId,
        key: &PermissionKey,
        ctx: &ResolutionContext,
        chain: &[String],
    ) -> Vec<String> {
        let mut tags = vec![
            format!("user:{user}"),
            format!("resource:{}", key.resource()),
        ];
        if let Some(tenant) = &ctx.tenant {
            tags.push(format!("tenant:{tenant}"));
        }
        if let Some(entity) = &ctx.entity {
            tags.push(format!("entity:{entity}"));
        }
        for element in chain.iter().skip(1) {
            tags.push(format!("perm:{element}"));
        }
        tags
    }

    pub(crate) fn record(&self, resolution: Resolution) -> Resolution {
        let mut counters = self.metrics.lock().expect("poisoned lock");
        counters.resolutions += 1;
        if resolution.cache_hit {
            counters.cache_hits += 1;
        }
        counters.total += resolution.resolution_time;
        counters.max = counters.max.max(resolution.resolution_time);
        if resolution.resolution_time > self.slow_threshold {
            counters.slow += 1;
        }
        resolution
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Condition;
    use crate::oracle::SuperAdminOverride;
    use crate::tiered_cache::TieredCache;
    use async_trait::async_trait;
    use futures::executor::block_on;
    use std::collections::{HashMap, HashSet};
    use std::sync::RwLock;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Mutable oracle double; grants are canonical keys, `#id`-suffixed
    /// when instance-scoped.
    #[derive(Default, Clone)]
    struct TestOracle {
        grants: Arc<RwLock<HashSet<String>>>,
        failing: Arc<AtomicBool>,
        calls: Arc<AtomicUsize>,
    }

    impl TestOracle {
        fn with_grants(grants: &[&str]) -> Self {
            let oracle = Self::default();
            for grant in grants {
                oracle.grant(grant);
            }
            oracle
        }

        fn grant(&self, value: &str) {
            self.grants
                .write()
                .expect("poisoned lock")
                .insert(value.to_string());
        }

        fn revoke(&self, value: &str) {
            self.grants.write().expect("poisoned lock").remove(value);
        }

        fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PermissionOracle for TestOracle {
        async fn has_permission(
            &self,
            _user: &UserId,
            key: &PermissionKey,
            _ctx: &ResolutionContext,
        ) -> std::result::Result<bool, OracleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err("permission backend unavailable".into());
            }
            let probe = match key.resource_id() {
                Some(id) => format!("{}#{id}", key.canonical()),
                None => key.canonical(),
            };
            Ok(self.grants.read().expect("poisoned lock").contains(&probe))
        }
    }

    struct MapDirectory(HashMap<RoleId, Vec<UserId>>);

    #[async_trait]
    impl RoleDirectory for MapDirectory {
        async fn role_members(
            &self,
            role: &RoleId,
        ) -> std::result::Result<Vec<UserId>, OracleError> {
            Ok(self.0.get(role).cloned().unwrap_or_default())
        }
    }

    fn user() -> UserId {
        UserId::try_from("user_1").unwrap()
    }

    fn key(value: &str) -> PermissionKey {
        PermissionKey::parse(value).unwrap()
    }

    fn check<O: PermissionOracle, C: DecisionCache>(
        engine: &Engine<O, C>,
        permission: &str,
    ) -> Resolution {
        block_on(engine.check_permission(&user(), &key(permission), &ResolutionContext::new()))
    }

    #[test]
    fn direct_grant_should_allow() {
        let engine = EngineBuilder::new(TestOracle::with_grants(&["documents:read"])).build();
        let resolution = check(&engine, "documents:read");

        assert!(resolution.granted);
        assert!(!resolution.cache_hit);
        assert_eq!(resolution.dependency_chain, vec!["documents:read".to_string()]);
    }

    #[test]
    fn manage_should_imply_read_update_delete() {
        let engine = EngineBuilder::new(TestOracle::with_grants(&["documents:manage"])).build();
        for action in ["read", "update", "delete"] {
            let resolution = check(&engine, &format!("documents:{action}"));
            assert!(resolution.granted, "manage should imply {action}");
            assert!(
                resolution
                    .dependency_chain
                    .contains(&"documents:manage".to_string())
            );
        }
    }

    #[test]
    fn unknown_permission_should_fail_closed() {
        let engine = EngineBuilder::new(TestOracle::default()).build();
        let resolution = check(&engine, "documents:view");

        assert!(!resolution.granted);
        assert_eq!(resolution.reason, Some(DenyReason::NotGranted));
    }

    #[test]
    fn graph_chain_should_grant_via_dependencies() {
        let engine =
            EngineBuilder::new(TestOracle::with_grants(&["users:view", "users:update"])).build();
        let resolution = check(&engine, "users:delete");

        assert!(resolution.granted);
        assert_eq!(resolution.dependency_chain[0], "users:delete");
    }

    #[test]
    fn cycle_should_deny_with_distinct_reason() {
        let mut graph = DependencyGraph::new();
        graph.require(&key("a:use"), key("b:use"), Condition::And, 0);
        graph.require(&key("b:use"), key("a:use"), Condition::And, 0);

        let engine = EngineBuilder::new(TestOracle::default())
            .graph(graph)
            .cache(TieredCache::default())
            .build();

        let resolution = check(&engine, "a:use");
        assert!(!resolution.granted);
        assert_eq!(resolution.reason, Some(DenyReason::CircularDependency));

        // Cycle denials are not cached; the reason stays visible.
        let again = check(&engine, "a:use");
        assert!(!again.cache_hit);
        assert_eq!(again.reason, Some(DenyReason::CircularDependency));
    }

    #[test]
    fn second_check_should_hit_cache_with_identical_result() {
        let oracle = TestOracle::with_grants(&["documents:read"]);
        let engine = EngineBuilder::new(oracle.clone())
            .cache(TieredCache::default())
            .build();

        let first = check(&engine, "documents:read");
        let calls_after_first = oracle.calls();
        let second = check(&engine, "documents:read");

        assert!(!first.cache_hit);
        assert!(second.cache_hit);
        assert_eq!(first.granted, second.granted);
        assert_eq!(first.dependency_chain, second.dependency_chain);
        assert_eq!(oracle.calls(), calls_after_first, "hit must not call oracle");
    }

    #[test]
    fn denials_should_be_cached_too() {
        let oracle = TestOracle::default();
        let engine = EngineBuilder::new(oracle.clone())
            .cache(TieredCache::default())
            .build();

        let first = check(&engine, "documents:read");
        let second = check(&engine, "documents:read");
        assert!(!first.granted);
        assert!(second.cache_hit);
        assert!(!second.granted);
    }

    #[test]
    fn invalidate_user_should_clear_stale_negative() {
        let oracle = TestOracle::default();
        let engine = EngineBuilder::new(oracle.clone())
            .cache(TieredCache::default())
            .build();

        assert!(!check(&engine, "documents:read").granted);

        oracle.grant("documents:read");
        engine.invalidate_user(user(), "role assigned");
        let evicted = block_on(engine.flush_invalidations());
        assert_eq!(evicted, 1);

        let resolution = check(&engine, "documents:read");
        assert!(resolution.granted);
        assert!(!resolution.cache_hit);
    }

    #[test]
    fn role_invalidation_should_cascade_to_members() {
        let oracle = TestOracle::with_grants(&["documents:read"]);
        let role = RoleId::try_from("role_editors").unwrap();
        let directory = MapDirectory(HashMap::from([(role.clone(), vec![user()])]));
        let engine = EngineBuilder::new(oracle.clone())
            .cache(TieredCache::default())
            .role_directory(directory)
            .build();

        assert!(check(&engine, "documents:read").granted);

        // Permission removed from the role upstream.
        oracle.revoke("documents:read");
        engine.invalidate_role(role, "permission removed");
        let _ = block_on(engine.flush_invalidations());

        let resolution = check(&engine, "documents:read");
        assert!(!resolution.granted);
    }

    #[test]
    fn oracle_failure_should_deny_without_caching() {
        let oracle = TestOracle::with_grants(&["documents:read"]);
        let engine = EngineBuilder::new(oracle.clone())
            .cache(TieredCache::default())
            .build();

        oracle.set_failing(true);
        let failed = check(&engine, "documents:read");
        assert!(!failed.granted);
        assert_eq!(failed.reason, Some(DenyReason::OracleFailure));

        oracle.set_failing(false);
        let recovered = check(&engine, "documents:read");
        assert!(recovered.granted, "failure denial must not be cached");
    }

    #[test]
    fn override_policy_should_bypass_all_stages() {
        let oracle = TestOracle::default();
        let engine = EngineBuilder::new(oracle.clone())
            .override_policy(SuperAdminOverride::new([user()]))
            .build();

        let resolution = check(&engine, "anything:delete");
        assert!(resolution.granted);
        assert_eq!(oracle.calls(), 0, "override must not consult the oracle");

        let other = UserId::try_from("user_2").unwrap();
        let denied = block_on(engine.check_permission(
            &other,
            &key("anything:delete"),
            &ResolutionContext::new(),
        ));
        assert!(!denied.granted);
    }

    #[test]
    fn entity_access_should_grant_through_boundary_stage() {
        let oracle = TestOracle::with_grants(&["entity:access#e1"]);
        let engine = EngineBuilder::new(oracle).build();
        let ctx = ResolutionContext::new().with_entity(EntityId::try_from("e1").unwrap());

        let resolution = block_on(engine.check_permission(&user(), &key("documents:read"), &ctx));
        assert!(resolution.granted);
        assert!(resolution.dependency_chain.contains(&"entity:access".to_string()));

        let other_ctx = ResolutionContext::new().with_entity(EntityId::try_from("e2").unwrap());
        let denied = block_on(engine.check_permission(&user(), &key("documents:read"), &other_ctx));
        assert!(!denied.granted);
    }

    #[test]
    fn context_resource_id_should_scope_the_check() {
        let oracle = TestOracle::with_grants(&["documents:read_any"]);
        let engine = EngineBuilder::new(oracle).build();
        let ctx = ResolutionContext::new().with_resource_id("42");

        let resolution = block_on(engine.check_permission(&user(), &key("documents:read"), &ctx));
        assert!(resolution.granted);
        assert!(
            resolution
                .dependency_chain
                .contains(&"documents:read_any".to_string())
        );
    }

    #[test]
    fn entity_invalidation_should_evict_entity_tagged_entries() {
        let oracle = TestOracle::with_grants(&["documents:read"]);
        let engine = EngineBuilder::new(oracle.clone())
            .cache(TieredCache::default())
            .build();
        let entity = EntityId::try_from("e1").unwrap();
        let ctx = ResolutionContext::new().with_entity(entity.clone());

        let first = block_on(engine.check_permission(&user(), &key("documents:read"), &ctx));
        assert!(first.granted);

        engine.invalidate_entity(entity, "membership change");
        let evicted = block_on(engine.flush_invalidations());
        assert_eq!(evicted, 1);
    }

    #[test]
    fn pending_invalidations_should_flush_once_window_elapses() {
        let oracle = TestOracle::default();
        let engine = EngineBuilder::new(oracle.clone())
            .cache(TieredCache::default())
            .invalidation_window(Duration::ZERO)
            .build();

        assert!(!check(&engine, "documents:read").granted);
        oracle.grant("documents:read");
        engine.invalidate_user(user(), "role assigned");

        // Zero window: the next check flushes before looking at the cache.
        let resolution = check(&engine, "documents:read");
        assert!(resolution.granted);
    }

    #[test]
    fn concurrent_identical_checks_should_all_agree() {
        let engine = Arc::new(
            EngineBuilder::new(TestOracle::with_grants(&["documents:read"]))
                .cache(TieredCache::default())
                .build(),
        );

        // Cold cache: several of these resolve redundantly, but every
        // caller must see the same boolean.
        let mut joins = Vec::new();
        for _ in 0..8 {
            let engine = Arc::clone(&engine);
            joins.push(std::thread::spawn(move || {
                block_on(engine.check_permission(
                    &user(),
                    &key("documents:read"),
                    &ResolutionContext::new(),
                ))
                .granted
            }));
        }

        let results: Vec<bool> = joins
            .into_iter()
            .map(|join| join.join().expect("thread panicked"))
            .collect();
        assert_eq!(results.len(), 8);
        assert!(results.iter().all(|granted| *granted));
    }

    #[test]
    fn performance_report_should_track_checks() {
        let engine = EngineBuilder::new(TestOracle::with_grants(&["documents:read"]))
            .cache(TieredCache::default())
            .build();

        let _ = check(&engine, "documents:read");
        let _ = check(&engine, "documents:read");

        let report = engine.performance_report();
        assert_eq!(report.resolutions, 2);
        assert_eq!(report.cache_hits, 1);
        assert!(report.max_resolution_time >= report.avg_resolution_time);
        assert_eq!(report.cache.size, 1);
    }

    #[test]
    fn grant_check_should_surface_boundary_reasons() {
        let oracle = TestOracle::with_grants(&["documents:edit", "roles:manage"]);
        let engine = EngineBuilder::new(oracle).build();
        let grant = GrantRequest {
            grantor: user(),
            grantor_entity: EntityId::try_from("e1").unwrap(),
            grantee: UserId::try_from("user_2").unwrap(),
            grantee_entity: EntityId::try_from("e2").unwrap(),
            permission: key("documents:edit"),
        };

        let decision = block_on(engine.check_grant(&grant));
        assert!(!decision.valid);
        assert_eq!(
            decision.reason.as_deref(),
            Some("Cross-entity permission grant not allowed")
        );
    }
}
