use crate::error::{Error, OracleError, Result};
use crate::oracle::PermissionOracle;
use crate::types::{Action, ResolutionContext, ResourceName, UserId};
use std::fmt;

/// A permission key: `(resource, action)` plus an optional resource instance.
///
/// The canonical serialized form is `resource:action`; the resource part may
/// itself be namespaced (`billing:invoice:read`). The resource id is carried
/// alongside the key, never encoded into the canonical string.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PermissionKey {
    resource: ResourceName,
    action: Action,
    resource_id: Option<String>,
}

impl PermissionKey {
    /// Creates a permission key from typed parts.
    pub fn new(resource: ResourceName, action: Action) -> Self {
        Self {
            resource,
            action,
            resource_id: None,
        }
    }

    /// Parses a canonical `resource:action` string.
    pub fn parse(value: impl AsRef<str>) -> Result<Self> {
        let value = value.as_ref().trim();
        let Some((resource, action)) = value.rsplit_once(':') else {
            return Err(Error::InvalidPermission(
                "permission must be in resource:action format".to_string(),
            ));
        };
        if resource.is_empty() || action.is_empty() {
            return Err(Error::InvalidPermission(
                "permission must not have empty segments".to_string(),
            ));
        }
        Ok(Self::new(ResourceName::new(resource)?, Action::new(action)?))
    }

    /// Scopes the key to a resource instance.
    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    /// Returns the resource name.
    pub fn resource(&self) -> &ResourceName {
        &self.resource
    }

    /// Returns the action.
    pub fn action(&self) -> &Action {
        &self.action
    }

    /// Returns the resource instance id, if any.
    pub fn resource_id(&self) -> Option<&str> {
        self.resource_id.as_deref()
    }

    /// Returns the canonical `resource:action` form.
    pub fn canonical(&self) -> String {
        format!("{}:{}", self.resource.as_str(), self.action.as_str())
    }

    fn sibling(&self, action: &str) -> Self {
        Self {
            resource: self.resource.clone(),
            action: Action::from_string(action.to_string()),
            resource_id: self.resource_id.clone(),
        }
    }
}

impl fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.resource_id {
            Some(id) => write!(f, "{}:{} ({id})", self.resource, self.action),
            None => write!(f, "{}:{}", self.resource, self.action),
        }
    }
}

impl TryFrom<&str> for PermissionKey {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::parse(value)
    }
}

/// Stronger actions on the same resource that imply the given one.
///
/// One canonical table, priority-ordered. `read` is implied by any mutating
/// action; `update`/`delete` are implied by `manage`; every action has an
/// `<action>_any` form that covers instance-scoped checks.
fn stronger_actions(action: &str) -> &'static [&'static str] {
    match action {
        "read" => &["update", "delete", "manage", "read_any"],
        "update" => &["manage", "update_any"],
        "delete" => &["manage", "delete_any"],
        _ => &[],
    }
}

/// Returns the ordered list of other permissions that would imply `key`.
pub fn implied_by(key: &PermissionKey) -> Vec<PermissionKey> {
    let action = key.action().as_str();
    let mut candidates: Vec<PermissionKey> = stronger_actions(action)
        .iter()
        .map(|stronger| key.sibling(stronger))
        .collect();

    // An `<action>_any` grant held without an instance id covers any
    // instance-scoped check for the same resource.
    if key.resource_id().is_some() && !action.ends_with("_any") {
        let mut any = key.sibling(&format!("{action}_any"));
        any.resource_id = None;
        candidates.push(any);
    }

    candidates
}

/// Probes the implication table against the oracle, first hit wins.
///
/// Returns the granted candidate so callers can report the dependency chain.
/// Pure apart from oracle calls.
pub async fn resolve_implied(
    oracle: &dyn PermissionOracle,
    user: &UserId,
    key: &PermissionKey,
    ctx: &ResolutionContext,
) -> std::result::Result<Option<PermissionKey>, OracleError> {
    for candidate in implied_by(key) {
        if oracle.has_permission(user, &candidate, ctx).await? {
            return Ok(Some(candidate));
        }
    }
    Ok(None)
}
