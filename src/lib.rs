//! Permission resolution and caching for multi-tenant services.
//!
//! This crate provides strong-typed identifiers, a permission implication
//! table, a typed dependency graph, entity boundary validation, and a
//! tiered decision cache with dependency-tag invalidation, all behind one
//! [`Engine`]. Resolution is deny-by-default: unknown permissions, graph
//! cycles and backend failures all resolve to a denial, never an error.
//!
//! # Examples
//!
//! Basic resolution flow using the in-memory store (enable `memory-store`):
//! ```no_run
//! use permgate::{EngineBuilder, PermissionKey, ResolutionContext, RoleId, UserId};
//! # #[cfg(feature = "memory-store")]
//! # {
//! use permgate::{MemoryStore, TieredCache};
//! let store = MemoryStore::new();
//! let role = RoleId::try_from("role_editor").unwrap();
//! let user = UserId::try_from("user_1").unwrap();
//! store.add_user_role(user.clone(), role.clone());
//! store.add_role_permission(role, PermissionKey::parse("documents:manage").unwrap());
//!
//! let engine = EngineBuilder::new(store.clone())
//!     .role_source(store.clone())
//!     .role_directory(store)
//!     .cache(TieredCache::default())
//!     .build();
//! let key = PermissionKey::parse("documents:read").unwrap();
//! let _ = engine.check_permission(&user, &key, &ResolutionContext::new());
//! # }
//! ```
#![forbid(unsafe_code)]

mod batch;
mod boundary;
mod cache;
mod engine;
mod error;
mod graph;
mod invalidation;
mod oracle;
mod permission;
mod store;
mod tiered_cache;
mod types;
mod warming;

#[cfg(feature = "memory-store")]
mod memory_store;

pub use crate::batch::PermissionCheck;
pub use crate::boundary::{BoundaryCheck, BoundaryValidator, GrantDecision, GrantRequest};
pub use crate::cache::{CacheStats, CachedDecision, DecisionCache, NoCache};
pub use crate::engine::{DenyReason, Engine, EngineBuilder, PerformanceReport, Resolution};
pub use crate::error::{Error, OracleError, Result};
pub use crate::graph::{Condition, DependencyEdge, DependencyGraph, GraphResolution};
pub use crate::invalidation::{InvalidationEvent, InvalidationScope};
pub use crate::oracle::{
    AlwaysDenyOracle, NoOverride, OverridePolicy, PermissionOracle, SuperAdminOverride,
};
pub use crate::permission::{PermissionKey, implied_by};
pub use crate::store::{RoleDirectory, RoleSource};
pub use crate::tiered_cache::{TierConfig, TieredCache, TieredConfig};
pub use crate::types::{
    Action, EntityId, ResolutionContext, ResourceName, RoleId, TenantId, UserId,
};
pub use crate::warming::{CacheWarmer, WarmCatalog, WarmReport};

#[cfg(feature = "memory-store")]
pub use crate::memory_store::MemoryStore;
