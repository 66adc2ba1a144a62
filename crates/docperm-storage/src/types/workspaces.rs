//! Workspace types.

use chrono::{DateTime, Utc};

use super::{UserId, WorkspaceId, WorkspaceRole};

/// Workspace record (root of the hierarchy)
#[derive(Clone, Debug)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Parameters for creating a workspace
#[derive(Clone, Debug)]
pub struct CreateWorkspaceParams {
    pub id: WorkspaceId, // Caller-generated workspace ID
    pub name: String,
}

/// Workspace membership record
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkspaceMember {
    pub workspace_id: WorkspaceId,
    pub user_id: UserId,
    pub role: WorkspaceRole,
    pub created_at: DateTime<Utc>,
}
