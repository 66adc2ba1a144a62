//! Guest collaborator types.

use chrono::{DateTime, Utc};

use super::{GuestId, GuestStatus, UserId, WorkspaceId};

/// Guest record, one per `(email, workspace)`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuestGrant {
    pub id: GuestId,
    pub email: String,
    pub workspace_id: WorkspaceId,
    pub status: GuestStatus,
    pub expires_at: DateTime<Utc>,
    pub invited_by_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GuestGrant {
    /// Whether the guest may still use its document grants at `now`.
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.status == GuestStatus::Active && self.expires_at > now
    }
}

/// Parameters for upserting a guest by `(email, workspace_id)`
#[derive(Clone, Debug)]
pub struct UpsertGuestParams {
    pub email: String,
    pub workspace_id: WorkspaceId,
    pub status: GuestStatus,
    pub expires_at: DateTime<Utc>,
    pub invited_by_id: Option<UserId>,
}
