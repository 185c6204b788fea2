//! Blueprint scopes: the subscription or management group a blueprint is
//! defined in.
//!
//! `validate` is the configuration-time check; `parse_scope` recovers the scope
//! prefix from a fully qualified id returned by the service.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::resource_id::ResourceId;

pub const SUBSCRIPTION_PREFIX: &str = "/subscription";
pub const MANAGEMENT_GROUP_PREFIX: &str = "/providers/Microsoft.Management/managementGroups/";

const MANAGEMENT_GROUP_SEGMENTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeErrorKind {
    MalformedScope,
    UnrecognizedScopeShape,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScopeError {
    #[error("subscription specified is not a valid resource ID: {key:?}")]
    InvalidSubscription { key: String },
    #[error("invalid management group path, should contain 4 elements not {found}")]
    SegmentCount { found: usize },
    #[error("management group ID not a valid uuid: {segment:?}")]
    InvalidManagementGroupId { segment: String },
    #[error("invalid scope, should be a subscription resource ID or management group path: {key:?}")]
    Unrecognized { key: String },
}

impl ScopeError {
    pub fn kind(&self) -> ScopeErrorKind {
        match self {
            ScopeError::Unrecognized { .. } => ScopeErrorKind::UnrecognizedScopeShape,
            _ => ScopeErrorKind::MalformedScope,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
pub struct InvalidScope(pub Vec<ScopeError>);

/// Checks `scope` (read from configuration key `key`). Only one branch fires, so
/// the errors all describe the same problem.
pub fn validate(scope: &str, key: &str) -> (Vec<String>, Vec<ScopeError>) {
    let warnings = Vec::new();
    let mut errors = Vec::new();

    if scope.starts_with(SUBSCRIPTION_PREFIX) {
        if ResourceId::parse(scope).is_err() {
            errors.push(ScopeError::InvalidSubscription { key: key.to_string() });
        }
    } else if scope.starts_with(MANAGEMENT_GROUP_PREFIX) {
        let trimmed = scope.strip_prefix('/').unwrap_or(scope);
        let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
        let components: Vec<&str> = trimmed.split('/').collect();
        if components.len() != MANAGEMENT_GROUP_SEGMENTS {
            errors.push(ScopeError::SegmentCount { found: components.len() });
        } else if !is_uuid(components[3]) {
            errors.push(ScopeError::InvalidManagementGroupId {
                segment: components[3].to_string(),
            });
        }
    } else {
        errors.push(ScopeError::Unrecognized { key: key.to_string() });
    }

    (warnings, errors)
}

// hyphenated form only
fn is_uuid(s: &str) -> bool {
    s.len() == 36 && Uuid::try_parse(s).is_ok()
}

/// Returns the scope prefix of a fully qualified id, or an empty string when the
/// id is anchored at neither a subscription nor a management group.
pub fn parse_scope(fully_qualified_id: &str) -> String {
    Scope::from_resource_id(fully_qualified_id)
        .map(|s| s.0)
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Subscription,
    ManagementGroup,
}

/// A scope string that passed [`validate`]. The string is kept exactly as the
/// user wrote it; it is what goes on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Scope(String);

impl Scope {
    pub fn new(scope: impl Into<String>) -> Result<Self, InvalidScope> {
        let scope = scope.into();
        let (_, errors) = validate(&scope, "scope");
        if errors.is_empty() {
            Ok(Self(scope))
        } else {
            Err(InvalidScope(errors))
        }
    }

    /// Segment-based truncation of a full id to its scope. No validation of the
    /// identifier values themselves.
    pub fn from_resource_id(id: &str) -> Option<Self> {
        let trimmed = id.strip_prefix('/')?;
        let mut segments = trimmed.split('/');
        match segments.next()? {
            "subscriptions" => {
                let sub = segments.next().filter(|s| !s.is_empty())?;
                Some(Self(format!("/subscriptions/{sub}")))
            }
            "providers" if id.starts_with(MANAGEMENT_GROUP_PREFIX) => {
                let group = segments.nth(2).filter(|s| !s.is_empty())?;
                Some(Self(format!("{MANAGEMENT_GROUP_PREFIX}{group}")))
            }
            _ => None,
        }
    }

    pub fn kind(&self) -> ScopeKind {
        if self.0.starts_with(MANAGEMENT_GROUP_PREFIX) {
            ScopeKind::ManagementGroup
        } else {
            ScopeKind::Subscription
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Scope {
    type Err = InvalidScope;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
