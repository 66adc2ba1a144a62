//! The GrantStore trait that backends implement.

use chrono::{DateTime, Utc};

use crate::types::*;
use crate::StoreError;

/// The storage trait `docperm-engine` depends on.
///
/// Grant writes are **upserts keyed by `(principal, resource, source_type)`**; backends
/// never insert a second row for the same key. An upsert carrying a `source_id`
/// (an inherited copy) must leave an existing explicit row (`source_id = None`) with
/// the same key untouched and return it instead.
#[cfg_attr(feature = "test-support", mockall::automock)]
#[async_trait::async_trait]
pub trait GrantStore: Send + Sync {
    // ───────────────────────────────────── Hierarchy ──────────────────────────────────────

    /// Create a workspace (returns the caller-supplied ID).
    async fn create_workspace(
        &self,
        params: &CreateWorkspaceParams,
    ) -> Result<WorkspaceId, StoreError>;

    /// Get workspace by ID.
    async fn get_workspace(&self, workspace_id: &WorkspaceId) -> Result<Workspace, StoreError>;

    /// Create a subspace inside a workspace.
    async fn create_subspace(&self, params: &CreateSubspaceParams)
        -> Result<SubspaceId, StoreError>;

    /// Get subspace by ID.
    async fn get_subspace(&self, subspace_id: &SubspaceId) -> Result<Subspace, StoreError>;

    /// List all subspaces of a workspace.
    async fn list_subspaces(&self, workspace_id: &WorkspaceId)
        -> Result<Vec<Subspace>, StoreError>;

    /// Change a subspace's visibility type.
    async fn set_subspace_type(
        &self,
        subspace_id: &SubspaceId,
        subspace_type: SubspaceType,
    ) -> Result<(), StoreError>;

    /// Create a document.
    async fn create_document(&self, params: &CreateDocumentParams)
        -> Result<DocumentId, StoreError>;

    /// Get document by ID.
    async fn get_document(&self, document_id: &DocumentId) -> Result<Document, StoreError>;

    /// Get several documents at once. Unknown IDs are omitted from the result.
    async fn get_documents(&self, document_ids: &[DocumentId])
        -> Result<Vec<Document>, StoreError>;

    /// List documents sitting directly at the root of a subspace (no parent document).
    async fn list_subspace_root_documents(
        &self,
        subspace_id: &SubspaceId,
    ) -> Result<Vec<Document>, StoreError>;

    /// List the direct children of a document.
    async fn list_child_documents(
        &self,
        document_id: &DocumentId,
    ) -> Result<Vec<Document>, StoreError>;

    /// Re-parent a document (and re-home it into a subspace).
    async fn move_document(
        &self,
        document_id: &DocumentId,
        parent_id: Option<DocumentId>,
        subspace_id: Option<SubspaceId>,
    ) -> Result<(), StoreError>;

    // ───────────────────────────────────── Membership ─────────────────────────────────────

    /// Add a user to a workspace, or change their role.
    async fn add_workspace_member(
        &self,
        workspace_id: &WorkspaceId,
        user_id: &UserId,
        role: WorkspaceRole,
    ) -> Result<(), StoreError>;

    /// List all members of a workspace.
    async fn list_workspace_members(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<WorkspaceMember>, StoreError>;

    /// Remove a user from a workspace.
    async fn remove_workspace_member(
        &self,
        workspace_id: &WorkspaceId,
        user_id: &UserId,
    ) -> Result<(), StoreError>;

    /// Add a user to a subspace, or change their role.
    async fn add_subspace_member(
        &self,
        subspace_id: &SubspaceId,
        user_id: &UserId,
        role: SubspaceRole,
    ) -> Result<(), StoreError>;

    /// List all members of a subspace.
    async fn list_subspace_members(
        &self,
        subspace_id: &SubspaceId,
    ) -> Result<Vec<SubspaceMember>, StoreError>;

    /// Remove a user from a subspace.
    async fn remove_subspace_member(
        &self,
        subspace_id: &SubspaceId,
        user_id: &UserId,
    ) -> Result<(), StoreError>;

    // ───────────────────────────────────── Groups ─────────────────────────────────────────

    /// Create a group.
    async fn create_group(&self, params: &CreateGroupParams) -> Result<GroupId, StoreError>;

    /// Get group by ID.
    async fn get_group(&self, group_id: &GroupId) -> Result<Group, StoreError>;

    /// Add a user to a group (idempotent).
    async fn add_group_member(&self, group_id: &GroupId, user_id: &UserId)
        -> Result<(), StoreError>;

    /// Remove a user from a group.
    async fn remove_group_member(
        &self,
        group_id: &GroupId,
        user_id: &UserId,
    ) -> Result<(), StoreError>;

    /// List members of a group.
    async fn list_group_members(&self, group_id: &GroupId) -> Result<Vec<GroupMember>, StoreError>;

    /// List all groups a user belongs to.
    async fn list_user_groups(&self, user_id: &UserId) -> Result<Vec<Group>, StoreError>;

    /// Set (upsert) a group-level permission on a resource.
    async fn set_group_permission(
        &self,
        group_id: &GroupId,
        resource: &ResourceRef,
        level: Level,
    ) -> Result<GroupPermission, StoreError>;

    /// Get a group-level permission on a resource.
    async fn get_group_permission(
        &self,
        group_id: &GroupId,
        resource: &ResourceRef,
    ) -> Result<GroupPermission, StoreError>;

    /// List all permissions held by a group.
    async fn list_group_permissions(
        &self,
        group_id: &GroupId,
    ) -> Result<Vec<GroupPermission>, StoreError>;

    /// Remove a group-level permission.
    async fn remove_group_permission(
        &self,
        group_id: &GroupId,
        resource: &ResourceRef,
    ) -> Result<(), StoreError>;

    // ───────────────────────────────────── Grants ─────────────────────────────────────────

    /// Insert or update the row keyed by `(principal, resource, source_type)`.
    async fn upsert_grant(&self, grant: &NewGrant) -> Result<PermissionGrant, StoreError>;

    /// Get a grant by ID.
    async fn get_grant(&self, grant_id: &GrantId) -> Result<PermissionGrant, StoreError>;

    /// Get the grant stored under a uniqueness key.
    async fn get_grant_by_key(&self, key: &GrantKey) -> Result<PermissionGrant, StoreError>;

    /// List every grant on a resource.
    async fn list_resource_grants(
        &self,
        resource: &ResourceRef,
    ) -> Result<Vec<PermissionGrant>, StoreError>;

    /// Batch query: all grants of `principal` on any of `resources`.
    async fn list_principal_grants(
        &self,
        principal: &Principal,
        resources: &[ResourceRef],
    ) -> Result<Vec<PermissionGrant>, StoreError>;

    /// List rows propagated directly from `source_id` (one hop).
    async fn list_grants_by_source(
        &self,
        source_id: &GrantId,
    ) -> Result<Vec<PermissionGrant>, StoreError>;

    /// Change the level of one grant.
    async fn update_grant_level(
        &self,
        grant_id: &GrantId,
        level: Level,
    ) -> Result<PermissionGrant, StoreError>;

    /// Change the level of every row whose `source_id` is `source_id` (one hop).
    /// Returns the number of rows updated.
    async fn update_grants_by_source(
        &self,
        source_id: &GrantId,
        level: Level,
    ) -> Result<u64, StoreError>;

    /// Delete one grant.
    async fn delete_grant(&self, grant_id: &GrantId) -> Result<(), StoreError>;

    /// Delete every row whose `source_id` is `source_id` (one hop).
    /// Returns the number of rows deleted.
    async fn delete_grants_by_source(&self, source_id: &GrantId) -> Result<u64, StoreError>;

    /// Delete every grant matching `filter`, returning the deleted rows.
    async fn delete_grants(
        &self,
        filter: &GrantFilter,
    ) -> Result<Vec<PermissionGrant>, StoreError>;

    /// Atomically replace the inherited rows of a resource: delete every row with a
    /// `source_id`, then upsert `grants`. Explicit rows survive.
    async fn replace_inherited_grants(
        &self,
        resource: &ResourceRef,
        grants: &[NewGrant],
    ) -> Result<Vec<PermissionGrant>, StoreError>;

    /// Delete every grant held by a guest. Returns the number of rows deleted.
    async fn delete_guest_grants(&self, guest_id: &GuestId) -> Result<u64, StoreError>;

    // ───────────────────────────────────── Guests ─────────────────────────────────────────

    /// Insert or refresh the guest keyed by `(email, workspace_id)`.
    async fn upsert_guest(&self, params: &UpsertGuestParams) -> Result<GuestGrant, StoreError>;

    /// Get guest by ID.
    async fn get_guest(&self, guest_id: &GuestId) -> Result<GuestGrant, StoreError>;

    /// List guests with `expires_at < now` that are not yet `EXPIRED`.
    async fn list_expired_guests(&self, now: DateTime<Utc>)
        -> Result<Vec<GuestGrant>, StoreError>;

    /// Set a guest's status unconditionally.
    async fn set_guest_status(
        &self,
        guest_id: &GuestId,
        status: GuestStatus,
    ) -> Result<(), StoreError>;

    /// Mark a guest `EXPIRED` if it is past `expires_at` and not already expired.
    /// Returns `false` when another sweep got there first.
    async fn mark_guest_expired(
        &self,
        guest_id: &GuestId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}
