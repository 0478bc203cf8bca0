use crate::boundary::BoundaryValidator;
use crate::cache::DecisionCache;
use crate::store::RoleDirectory;
use crate::types::{EntityId, RoleId, UserId};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const DEFAULT_WINDOW: Duration = Duration::from_millis(100);

/// What an invalidation event targets.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum InvalidationScope {
    /// One user's cached decisions.
    User(UserId),
    /// Every user holding a role (cascades to user scope).
    Role(RoleId),
    /// Every decision derived within an entity.
    Entity(EntityId),
    /// Everything.
    Global,
}

/// A pending invalidation. Transient: queued, flushed, discarded.
#[derive(Clone, Debug)]
pub struct InvalidationEvent {
    /// Target of the invalidation.
    pub scope: InvalidationScope,
    /// Why the invalidation was requested, for logging only.
    pub reason: String,
}

#[derive(Debug, Default)]
struct Pending {
    // Last write wins per scope inside one window.
    events: HashMap<InvalidationScope, String>,
    opened_at: Option<Instant>,
}

/// Debounced invalidation queue.
///
/// Events enqueue without blocking; a flush expands them into tag
/// evictions. Role and permission mutations tend to come in bursts, so
/// events for the same scope inside one window collapse into a single
/// eviction pass. The crate spawns no timer: the window is enforced by
/// [`Invalidator::due`] checks on enqueue plus explicit flushes from the
/// host.
#[derive(Debug)]
pub struct Invalidator {
    pending: Mutex<Pending>,
    window: Duration,
}

impl Default for Invalidator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl Invalidator {
    /// Creates an invalidator with the given batching window.
    pub fn new(window: Duration) -> Self {
        Self {
            pending: Mutex::new(Pending::default()),
            window,
        }
    }

    /// Enqueues an event. Non-blocking, never flushes by itself.
    pub fn enqueue(&self, event: InvalidationEvent) {
        let mut pending = self.pending.lock().expect("poisoned lock");
        if pending.opened_at.is_none() {
            pending.opened_at = Some(Instant::now());
        }
        pending.events.insert(event.scope, event.reason);
    }

    /// Whether the batching window for the pending batch has elapsed.
    pub fn due(&self) -> bool {
        let pending = self.pending.lock().expect("poisoned lock");
        pending
            .opened_at
            .is_some_and(|opened| opened.elapsed() >= self.window)
    }

    /// Takes the pending batch, leaving the queue empty.
    pub fn drain(&self) -> Vec<InvalidationEvent> {
        let mut pending = self.pending.lock().expect("poisoned lock");
        pending.opened_at = None;
        pending
            .events
            .drain()
            .map(|(scope, reason)| InvalidationEvent { scope, reason })
            .collect()
    }

    /// Pending event count, for observability.
    pub fn pending(&self) -> usize {
        self.pending.lock().expect("poisoned lock").events.len()
    }
}

/// Expands a drained batch into cache evictions; returns evicted key count.
///
/// Role events must cascade: a role-permission change is invisible until
/// every member's cached decisions are cleared too. Without a directory the
/// cascade cannot be expanded, so the whole cache is dropped instead;
/// over-invalidation is safe, staleness is not.
pub(crate) async fn apply_events(
    events: Vec<InvalidationEvent>,
    cache: &dyn DecisionCache,
    directory: Option<&dyn RoleDirectory>,
    boundary: &BoundaryValidator,
) -> usize {
    let mut evicted = 0;

    for event in events {
        tracing::debug!(scope = ?event.scope, reason = %event.reason, "flushing invalidation");
        match event.scope {
            InvalidationScope::User(user) => {
                evicted += invalidate_user(cache, boundary, &user).await;
            }
            InvalidationScope::Role(role) => {
                evicted += cache.invalidate_tag(&format!("role:{role}")).await;
                match directory {
                    Some(directory) => match directory.role_members(&role).await {
                        Ok(members) => {
                            for member in members {
                                evicted += invalidate_user(cache, boundary, &member).await;
                            }
                        }
                        Err(error) => {
                            tracing::warn!(%role, %error, "role member lookup failed; clearing cache");
                            cache.clear().await;
                            boundary.clear();
                        }
                    },
                    None => {
                        tracing::warn!(%role, "no role directory configured; clearing cache");
                        cache.clear().await;
                        boundary.clear();
                    }
                }
            }
            InvalidationScope::Entity(entity) => {
                evicted += cache.invalidate_tag(&format!("entity:{entity}")).await;
            }
            InvalidationScope::Global => {
                cache.clear().await;
                boundary.clear();
            }
        }
    }

    evicted
}

async fn invalidate_user(
    cache: &dyn DecisionCache,
    boundary: &BoundaryValidator,
    user: &UserId,
) -> usize {
    boundary.clear_user(user);
    cache.invalidate_tag(&format!("user:{user}")).await
}
