use crate::error::OracleError;
use crate::oracle::PermissionOracle;
use crate::permission::PermissionKey;
use crate::types::{ResolutionContext, UserId};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// How a prerequisite combines with its siblings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Condition {
    /// Must hold together with every other `And` prerequisite.
    And,
    /// Holding this prerequisite alone is sufficient.
    Or,
}

/// A typed prerequisite edge in the dependency graph.
#[derive(Clone, Debug)]
pub struct DependencyEdge {
    /// Permission that must already be held.
    pub required: PermissionKey,
    /// Combination semantics with sibling edges.
    pub condition: Condition,
    /// Evaluation order, ascending.
    pub priority: u32,
}

/// Outcome of a graph resolution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GraphResolution {
    /// Whether the permission resolved to granted.
    pub granted: bool,
    /// Canonical keys that blocked resolution.
    pub missing: Vec<String>,
    /// Canonical keys visited along the granting path.
    pub path: Vec<String>,
    /// A dependency cycle was encountered while resolving.
    pub cycle_detected: bool,
}

impl GraphResolution {
    fn denied(missing: Vec<String>) -> Self {
        Self {
            granted: false,
            missing,
            path: Vec::new(),
            cycle_detected: false,
        }
    }
}

/// Directed graph of permission prerequisites.
///
/// Keys are canonical `resource:action` strings. Edges are configuration,
/// registered at composition time and never mutated while resolving.
#[derive(Clone, Debug, Default)]
pub struct DependencyGraph {
    edges: HashMap<String, Vec<DependencyEdge>>,
}

impl DependencyGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a graph seeded with the stock domain rules.
    pub fn with_default_rules() -> Self {
        let mut graph = Self::new();
        let key = |value: &str| PermissionKey::parse(value).expect("static rule key");

        graph.require(&key("users:update"), key("users:view"), Condition::And, 0);
        graph.require(&key("users:delete"), key("users:view"), Condition::And, 0);
        graph.require(&key("users:delete"), key("users:update"), Condition::And, 1);
        graph.require(&key("roles:assign"), key("roles:view"), Condition::And, 0);
        graph.require(
            &key("documents:publish"),
            key("documents:update"),
            Condition::And,
            0,
        );
        graph.require(
            &key("documents:share"),
            key("documents:manage"),
            Condition::Or,
            0,
        );
        graph.require(
            &key("documents:share"),
            key("documents:update"),
            Condition::Or,
            1,
        );
        graph
    }

    /// Registers a prerequisite edge for a permission.
    pub fn register(&mut self, permission: &PermissionKey, edge: DependencyEdge) {
        self.edges.entry(permission.canonical()).or_default().push(edge);
    }

    /// Convenience wrapper around [`DependencyGraph::register`].
    pub fn require(
        &mut self,
        permission: &PermissionKey,
        required: PermissionKey,
        condition: Condition,
        priority: u32,
    ) {
        self.register(
            permission,
            DependencyEdge {
                required,
                condition,
                priority,
            },
        );
    }

    /// Returns whether any edges are registered for the permission.
    pub fn has_rules_for(&self, permission: &PermissionKey) -> bool {
        self.edges.contains_key(&permission.canonical())
    }

    /// Resolves a permission by walking its prerequisites depth-first.
    ///
    /// A direct grant wins immediately. Otherwise edges are evaluated in
    /// ascending priority: every `And` edge must hold, any `Or` edge alone
    /// grants and stops resolution. Revisiting a permission already on the
    /// current path fails that branch closed and flags the cycle.
    pub async fn resolve(
        &self,
        user: &UserId,
        key: &PermissionKey,
        oracle: &dyn PermissionOracle,
        ctx: &ResolutionContext,
    ) -> std::result::Result<GraphResolution, OracleError> {
        let mut visiting = HashSet::new();
        self.resolve_inner(user, key.clone(), oracle, ctx, &mut visiting)
            .await
    }

    fn resolve_inner<'a>(
        &'a self,
        user: &'a UserId,
        key: PermissionKey,
        oracle: &'a dyn PermissionOracle,
        ctx: &'a ResolutionContext,
        visiting: &'a mut HashSet<String>,
    ) -> BoxFuture<'a, std::result::Result<GraphResolution, OracleError>> {
        Box::pin(async move {
            let canonical = key.canonical();

            if visiting.contains(&canonical) {
                return Ok(GraphResolution {
                    granted: false,
                    missing: vec![canonical],
                    path: Vec::new(),
                    cycle_detected: true,
                });
            }

            if oracle.has_permission(user, &key, ctx).await? {
                return Ok(GraphResolution {
                    granted: true,
                    missing: Vec::new(),
                    path: vec![canonical],
                    cycle_detected: false,
                });
            }

            let Some(edges) = self.edges.get(&canonical) else {
                return Ok(GraphResolution::denied(vec![canonical]));
            };

            let mut ordered: Vec<&DependencyEdge> = edges.iter().collect();
            ordered.sort_by_key(|edge| edge.priority);

            visiting.insert(canonical.clone());

            let mut path = vec![canonical.clone()];
            let mut missing = Vec::new();
            let mut cycle_detected = false;
            let mut and_failed = false;
            let mut saw_and = false;
            let mut or_granted = false;

            for edge in ordered {
                // Once an And prerequisite failed, only an Or edge can
                // still rescue the resolution.
                if and_failed && edge.condition == Condition::And {
                    continue;
                }

                let branch = self
                    .resolve_inner(user, edge.required.clone(), oracle, ctx, visiting)
                    .await?;
                cycle_detected |= branch.cycle_detected;

                match edge.condition {
                    Condition::Or if branch.granted => {
                        path.extend(branch.path);
                        or_granted = true;
                        break;
                    }
                    Condition::Or => missing.extend(branch.missing),
                    Condition::And => {
                        saw_and = true;
                        if branch.granted {
                            path.extend(branch.path);
                        } else {
                            and_failed = true;
                            missing.extend(branch.missing);
                        }
                    }
                }
            }

            visiting.remove(&canonical);

            let granted = or_granted || (saw_and && !and_failed);
            Ok(GraphResolution {
                granted,
                missing: if granted { Vec::new() } else { missing },
                path: if granted { path } else { Vec::new() },
                cycle_detected,
            })
        })
    }
}
