//! Group types for workspace-level user grouping.

use chrono::{DateTime, Utc};

use super::{GroupId, Level, ResourceRef, UserId, WorkspaceId};

/// Group record
#[derive(Clone, Debug)]
pub struct Group {
    pub id: GroupId,
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Group membership record
#[derive(Clone, Debug)]
pub struct GroupMember {
    pub group_id: GroupId,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
}

/// Parameters for creating a group
#[derive(Clone, Debug)]
pub struct CreateGroupParams {
    pub id: GroupId,
    pub workspace_id: WorkspaceId,
    pub name: String,
}

/// Group-level permission, expanded into one `GROUP` grant per member
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupPermission {
    pub group_id: GroupId,
    pub resource: ResourceRef,
    pub level: Level,
    pub created_at: DateTime<Utc>,
}
