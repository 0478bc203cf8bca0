use crate::batch::PermissionCheck;
use crate::cache::DecisionCache;
use crate::engine::Engine;
use crate::oracle::PermissionOracle;
use crate::permission::PermissionKey;
use crate::types::{ResolutionContext, TenantId, UserId};

/// The permission pairs worth resolving ahead of demand.
///
/// Kept as plain data so hosts can build one from traffic stats instead
/// of the stock list.
#[derive(Clone, Debug)]
pub struct WarmCatalog {
    entries: Vec<PermissionCheck>,
}

impl WarmCatalog {
    /// Creates a catalog from explicit checks.
    pub fn new(entries: Vec<PermissionCheck>) -> Self {
        Self { entries }
    }

    /// Returns the catalog entries.
    pub fn entries(&self) -> &[PermissionCheck] {
        &self.entries
    }
}

impl Default for WarmCatalog {
    /// The read-heavy pairs almost every session touches first.
    fn default() -> Self {
        let entry = |value: &str| {
            let key = PermissionKey::parse(value).expect("static catalog key");
            PermissionCheck::new(key.resource().clone(), key.action().clone())
        };
        Self::new(vec![
            entry("documents:read"),
            entry("documents:update"),
            entry("users:view"),
            entry("reports:view"),
        ])
    }
}

/// What a warming pass did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WarmReport {
    /// Checks resolved and written to the cache.
    pub warmed: usize,
    /// Checks skipped: already cached, or the whole pass refused.
    pub skipped: usize,
}

/// Proactive cache filler.
///
/// Resolves catalog entries for a set of users through the normal check
/// path so the entries land in the cache with correct tags and TTLs.
/// Scheduling is the host's concern; a pass is a plain async call.
#[derive(Clone, Debug, Default)]
pub struct CacheWarmer {
    catalog: WarmCatalog,
}

impl CacheWarmer {
    /// Creates a warmer over the given catalog.
    pub fn new(catalog: WarmCatalog) -> Self {
        Self { catalog }
    }

    /// Warms every catalog entry for every listed user.
    ///
    /// Entries already cached are skipped; a cache under memory pressure
    /// refuses the pass outright, warming must never evict hot entries
    /// to make room for speculative ones.
    pub async fn warm_users<O, C>(
        &self,
        engine: &Engine<O, C>,
        users: &[UserId],
        tenant: Option<&TenantId>,
    ) -> WarmReport
    where
        O: PermissionOracle,
        C: DecisionCache,
    {
        let total = users.len() * self.catalog.entries.len();
        if engine.cache.under_pressure() {
            tracing::info!(skipped = total, "cache under pressure; skipping warm pass");
            return WarmReport {
                warmed: 0,
                skipped: total,
            };
        }

        let mut ctx = ResolutionContext::new();
        if let Some(tenant) = tenant {
            ctx.tenant = Some(tenant.clone());
        }

        let mut report = WarmReport::default();
        for user in users {
            for entry in &self.catalog.entries {
                let key = PermissionKey::new(entry.resource.clone(), entry.action.clone());
                let cache_key = Engine::<O, C>::cache_key(user, &key, &ctx);
                if engine.cache.get(&cache_key).await.is_some() {
                    report.skipped += 1;
                    continue;
                }
                let _ = engine.check_permission(user, &key, &ctx).await;
                report.warmed += 1;
            }
        }

        tracing::debug!(warmed = report.warmed, skipped = report.skipped, "warm pass done");
        report
    }
}
