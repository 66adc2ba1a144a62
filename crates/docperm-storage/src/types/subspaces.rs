//! Subspace types.

use chrono::{DateTime, Utc};

use super::{SubspaceId, SubspaceRole, SubspaceType, UserId, WorkspaceId};

/// Subspace record
#[derive(Clone, Debug)]
pub struct Subspace {
    pub id: SubspaceId,
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub subspace_type: SubspaceType,
    pub created_by_id: UserId,
    pub created_at: DateTime<Utc>,
}

/// Parameters for creating a subspace
#[derive(Clone, Debug)]
pub struct CreateSubspaceParams {
    pub id: SubspaceId,
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub subspace_type: SubspaceType,
    pub created_by_id: UserId,
}

/// Subspace membership record
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubspaceMember {
    pub subspace_id: SubspaceId,
    pub user_id: UserId,
    pub role: SubspaceRole,
    pub created_at: DateTime<Utc>,
}
