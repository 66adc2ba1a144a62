//! Permission grant rows: the single denormalized table the engine reads and writes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{GrantId, Level, Principal, ResourceRef, SourceType, UserId};

/// A principal's access level on one resource, through one source.
///
/// Unique on `(principal, resource, source_type)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub id: GrantId,
    pub principal: Principal,
    pub resource: ResourceRef,
    pub level: Level,
    pub source_type: SourceType,
    /// Grant this row was propagated from (one hop). `None` for explicit rows.
    pub source_id: Option<GrantId>,
    pub created_by_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl PermissionGrant {
    pub fn key(&self) -> GrantKey {
        GrantKey {
            principal: self.principal,
            resource: self.resource,
            source_type: self.source_type,
        }
    }

    /// True for rows created by propagation rather than by assignment.
    pub fn is_inherited(&self) -> bool {
        self.source_id.is_some()
    }
}

/// Uniqueness key of a grant row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GrantKey {
    pub principal: Principal,
    pub resource: ResourceRef,
    pub source_type: SourceType,
}

/// Parameters for upserting a grant
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewGrant {
    pub principal: Principal,
    pub resource: ResourceRef,
    pub level: Level,
    pub source_type: SourceType,
    pub source_id: Option<GrantId>,
    pub created_by_id: Option<UserId>,
}

impl NewGrant {
    pub fn key(&self) -> GrantKey {
        GrantKey {
            principal: self.principal,
            resource: self.resource,
            source_type: self.source_type,
        }
    }

    /// Copy of `origin` placed on `resource`, pointing back at `origin`.
    pub fn inherited_from(origin: &PermissionGrant, resource: ResourceRef) -> Self {
        Self {
            principal: origin.principal,
            resource,
            level: origin.level,
            source_type: origin.source_type,
            source_id: Some(origin.id),
            created_by_id: origin.created_by_id,
        }
    }
}

/// Filter for bulk grant deletion. Unset fields match everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GrantFilter {
    pub resource: Option<ResourceRef>,
    pub principal: Option<Principal>,
    /// Empty matches every source type.
    pub source_types: Vec<SourceType>,
    pub level: Option<Level>,
}

impl GrantFilter {
    pub fn matches(&self, grant: &PermissionGrant) -> bool {
        self.resource.is_none_or(|r| r == grant.resource)
            && self.principal.is_none_or(|p| p == grant.principal)
            && (self.source_types.is_empty() || self.source_types.contains(&grant.source_type))
            && self.level.is_none_or(|l| l == grant.level)
    }
}
