//! In-memory grant store.
//!
//! This implementation is suitable for:
//! - Single node deployments
//! - Development and testing
//!
//! All state sits behind one `RwLock`, so every trait method is atomic and a write
//! is visible to the next read (read-your-writes).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docperm_storage::{
    CreateDocumentParams, CreateGroupParams, CreateSubspaceParams, CreateWorkspaceParams,
    Document, DocumentId, GrantFilter, GrantId, GrantKey, GrantStore, Group, GroupId,
    GroupMember, GroupPermission, GuestGrant, GuestId, GuestStatus, Level, NewGrant,
    PermissionGrant, Principal, ResourceRef, StoreError, Subspace, SubspaceId, SubspaceMember,
    SubspaceRole, SubspaceType, UpsertGuestParams, UserId, Workspace, WorkspaceId,
    WorkspaceMember, WorkspaceRole,
};
use tokio::sync::RwLock;

/// In-memory `GrantStore`.
///
/// Data lives only as long as the process. Use the SQLite store for durability.
pub struct MemoryGrantStore {
    state: RwLock<State>,
}

#[derive(Default)]
struct State {
    workspaces: HashMap<WorkspaceId, Workspace>,
    subspaces: HashMap<SubspaceId, Subspace>,
    documents: HashMap<DocumentId, Document>,
    workspace_members: HashMap<(WorkspaceId, UserId), WorkspaceMember>,
    subspace_members: HashMap<(SubspaceId, UserId), SubspaceMember>,
    groups: HashMap<GroupId, Group>,
    group_members: HashMap<(GroupId, UserId), GroupMember>,
    group_permissions: HashMap<(GroupId, ResourceRef), GroupPermission>,
    grants: HashMap<GrantId, PermissionGrant>,
    grant_keys: HashMap<GrantKey, GrantId>,
    guests: HashMap<GuestId, GuestGrant>,
    guest_keys: HashMap<(String, WorkspaceId), GuestId>,
}

impl State {
    fn upsert_grant(&mut self, new: &NewGrant) -> PermissionGrant {
        let key = new.key();
        if let Some(existing) = self
            .grant_keys
            .get(&key)
            .and_then(|id| self.grants.get_mut(id))
        {
            // Inherited copies never take over an explicitly assigned row
            if existing.source_id.is_none() && new.source_id.is_some() {
                return existing.clone();
            }
            existing.level = new.level;
            existing.source_id = new.source_id;
            existing.created_by_id = new.created_by_id;
            return existing.clone();
        }

        let grant = PermissionGrant {
            id: GrantId::new(),
            principal: new.principal,
            resource: new.resource,
            level: new.level,
            source_type: new.source_type,
            source_id: new.source_id,
            created_by_id: new.created_by_id,
            created_at: Utc::now(),
        };
        self.grant_keys.insert(key, grant.id);
        self.grants.insert(grant.id, grant.clone());
        grant
    }

    fn remove_grants_where<F>(&mut self, predicate: F) -> Vec<PermissionGrant>
    where
        F: Fn(&PermissionGrant) -> bool,
    {
        let ids: Vec<GrantId> = self
            .grants
            .values()
            .filter(|g| predicate(g))
            .map(|g| g.id)
            .collect();

        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(grant) = self.grants.remove(&id) {
                self.grant_keys.remove(&grant.key());
                removed.push(grant);
            }
        }
        sort_grants(&mut removed);
        removed
    }

    fn grants_where<F>(&self, predicate: F) -> Vec<PermissionGrant>
    where
        F: Fn(&PermissionGrant) -> bool,
    {
        let mut grants: Vec<PermissionGrant> =
            self.grants.values().filter(|g| predicate(g)).cloned().collect();
        sort_grants(&mut grants);
        grants
    }

    fn documents_where<F>(&self, predicate: F) -> Vec<Document>
    where
        F: Fn(&Document) -> bool,
    {
        let mut docs: Vec<Document> = self
            .documents
            .values()
            .filter(|d| predicate(d))
            .cloned()
            .collect();
        docs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        docs
    }
}

fn sort_grants(grants: &mut [PermissionGrant]) {
    grants.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
}

impl MemoryGrantStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }
}

impl Default for MemoryGrantStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GrantStore for MemoryGrantStore {
    // ───────────────────────────── Hierarchy ─────────────────────────────

    async fn create_workspace(
        &self,
        params: &CreateWorkspaceParams,
    ) -> Result<WorkspaceId, StoreError> {
        let mut state = self.state.write().await;
        if state.workspaces.contains_key(&params.id) {
            return Err(StoreError::AlreadyExists);
        }
        state.workspaces.insert(
            params.id,
            Workspace {
                id: params.id,
                name: params.name.clone(),
                created_at: Utc::now(),
            },
        );
        Ok(params.id)
    }

    async fn get_workspace(&self, workspace_id: &WorkspaceId) -> Result<Workspace, StoreError> {
        let state = self.state.read().await;
        state
            .workspaces
            .get(workspace_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn create_subspace(
        &self,
        params: &CreateSubspaceParams,
    ) -> Result<SubspaceId, StoreError> {
        let mut state = self.state.write().await;
        if !state.workspaces.contains_key(&params.workspace_id) {
            return Err(StoreError::NotFound);
        }
        if state.subspaces.contains_key(&params.id) {
            return Err(StoreError::AlreadyExists);
        }
        state.subspaces.insert(
            params.id,
            Subspace {
                id: params.id,
                workspace_id: params.workspace_id,
                name: params.name.clone(),
                subspace_type: params.subspace_type,
                created_by_id: params.created_by_id,
                created_at: Utc::now(),
            },
        );
        Ok(params.id)
    }

    async fn get_subspace(&self, subspace_id: &SubspaceId) -> Result<Subspace, StoreError> {
        let state = self.state.read().await;
        state
            .subspaces
            .get(subspace_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list_subspaces(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<Subspace>, StoreError> {
        let state = self.state.read().await;
        let mut subspaces: Vec<Subspace> = state
            .subspaces
            .values()
            .filter(|s| s.workspace_id == *workspace_id)
            .cloned()
            .collect();
        subspaces.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(subspaces)
    }

    async fn set_subspace_type(
        &self,
        subspace_id: &SubspaceId,
        subspace_type: SubspaceType,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let subspace = state
            .subspaces
            .get_mut(subspace_id)
            .ok_or(StoreError::NotFound)?;
        subspace.subspace_type = subspace_type;
        Ok(())
    }

    async fn create_document(
        &self,
        params: &CreateDocumentParams,
    ) -> Result<DocumentId, StoreError> {
        let mut state = self.state.write().await;
        if !state.workspaces.contains_key(&params.workspace_id) {
            return Err(StoreError::NotFound);
        }
        if let Some(subspace_id) = &params.subspace_id {
            if !state.subspaces.contains_key(subspace_id) {
                return Err(StoreError::NotFound);
            }
        }
        if let Some(parent_id) = &params.parent_id {
            if !state.documents.contains_key(parent_id) {
                return Err(StoreError::NotFound);
            }
        }
        if state.documents.contains_key(&params.id) {
            return Err(StoreError::AlreadyExists);
        }
        state.documents.insert(
            params.id,
            Document {
                id: params.id,
                workspace_id: params.workspace_id,
                subspace_id: params.subspace_id,
                parent_id: params.parent_id,
                title: params.title.clone(),
                created_at: Utc::now(),
            },
        );
        Ok(params.id)
    }

    async fn get_document(&self, document_id: &DocumentId) -> Result<Document, StoreError> {
        let state = self.state.read().await;
        state
            .documents
            .get(document_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn get_documents(
        &self,
        document_ids: &[DocumentId],
    ) -> Result<Vec<Document>, StoreError> {
        let state = self.state.read().await;
        Ok(document_ids
            .iter()
            .filter_map(|id| state.documents.get(id).cloned())
            .collect())
    }

    async fn list_subspace_root_documents(
        &self,
        subspace_id: &SubspaceId,
    ) -> Result<Vec<Document>, StoreError> {
        let state = self.state.read().await;
        Ok(state.documents_where(|d| d.subspace_id == Some(*subspace_id) && d.parent_id.is_none()))
    }

    async fn list_child_documents(
        &self,
        document_id: &DocumentId,
    ) -> Result<Vec<Document>, StoreError> {
        let state = self.state.read().await;
        Ok(state.documents_where(|d| d.parent_id == Some(*document_id)))
    }

    async fn move_document(
        &self,
        document_id: &DocumentId,
        parent_id: Option<DocumentId>,
        subspace_id: Option<SubspaceId>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if parent_id == Some(*document_id) {
            return Err(StoreError::Conflict);
        }
        if let Some(parent_id) = &parent_id {
            if !state.documents.contains_key(parent_id) {
                return Err(StoreError::NotFound);
            }
        }
        if let Some(subspace_id) = &subspace_id {
            if !state.subspaces.contains_key(subspace_id) {
                return Err(StoreError::NotFound);
            }
        }
        let document = state
            .documents
            .get_mut(document_id)
            .ok_or(StoreError::NotFound)?;
        document.parent_id = parent_id;
        document.subspace_id = subspace_id;
        Ok(())
    }

    // ───────────────────────────── Membership ─────────────────────────────

    async fn add_workspace_member(
        &self,
        workspace_id: &WorkspaceId,
        user_id: &UserId,
        role: WorkspaceRole,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if !state.workspaces.contains_key(workspace_id) {
            return Err(StoreError::NotFound);
        }
        state
            .workspace_members
            .entry((*workspace_id, *user_id))
            .and_modify(|m| m.role = role)
            .or_insert_with(|| WorkspaceMember {
                workspace_id: *workspace_id,
                user_id: *user_id,
                role,
                created_at: Utc::now(),
            });
        Ok(())
    }

    async fn list_workspace_members(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<WorkspaceMember>, StoreError> {
        let state = self.state.read().await;
        let mut members: Vec<WorkspaceMember> = state
            .workspace_members
            .values()
            .filter(|m| m.workspace_id == *workspace_id)
            .cloned()
            .collect();
        members.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.user_id.cmp(&b.user_id)));
        Ok(members)
    }

    async fn remove_workspace_member(
        &self,
        workspace_id: &WorkspaceId,
        user_id: &UserId,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state
            .workspace_members
            .remove(&(*workspace_id, *user_id))
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn add_subspace_member(
        &self,
        subspace_id: &SubspaceId,
        user_id: &UserId,
        role: SubspaceRole,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if !state.subspaces.contains_key(subspace_id) {
            return Err(StoreError::NotFound);
        }
        state
            .subspace_members
            .entry((*subspace_id, *user_id))
            .and_modify(|m| m.role = role)
            .or_insert_with(|| SubspaceMember {
                subspace_id: *subspace_id,
                user_id: *user_id,
                role,
                created_at: Utc::now(),
            });
        Ok(())
    }

    async fn list_subspace_members(
        &self,
        subspace_id: &SubspaceId,
    ) -> Result<Vec<SubspaceMember>, StoreError> {
        let state = self.state.read().await;
        let mut members: Vec<SubspaceMember> = state
            .subspace_members
            .values()
            .filter(|m| m.subspace_id == *subspace_id)
            .cloned()
            .collect();
        members.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.user_id.cmp(&b.user_id)));
        Ok(members)
    }

    async fn remove_subspace_member(
        &self,
        subspace_id: &SubspaceId,
        user_id: &UserId,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state
            .subspace_members
            .remove(&(*subspace_id, *user_id))
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    // ───────────────────────────── Groups ─────────────────────────────

    async fn create_group(&self, params: &CreateGroupParams) -> Result<GroupId, StoreError> {
        let mut state = self.state.write().await;
        if !state.workspaces.contains_key(&params.workspace_id) {
            return Err(StoreError::NotFound);
        }
        let name_taken = state
            .groups
            .values()
            .any(|g| g.workspace_id == params.workspace_id && g.name == params.name);
        if name_taken || state.groups.contains_key(&params.id) {
            return Err(StoreError::AlreadyExists);
        }
        state.groups.insert(
            params.id,
            Group {
                id: params.id,
                workspace_id: params.workspace_id,
                name: params.name.clone(),
                created_at: Utc::now(),
            },
        );
        Ok(params.id)
    }

    async fn get_group(&self, group_id: &GroupId) -> Result<Group, StoreError> {
        let state = self.state.read().await;
        state.groups.get(group_id).cloned().ok_or(StoreError::NotFound)
    }

    async fn add_group_member(
        &self,
        group_id: &GroupId,
        user_id: &UserId,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if !state.groups.contains_key(group_id) {
            return Err(StoreError::NotFound);
        }
        state
            .group_members
            .entry((*group_id, *user_id))
            .or_insert_with(|| GroupMember {
                group_id: *group_id,
                user_id: *user_id,
                created_at: Utc::now(),
            });
        Ok(())
    }

    async fn remove_group_member(
        &self,
        group_id: &GroupId,
        user_id: &UserId,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state
            .group_members
            .remove(&(*group_id, *user_id))
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn list_group_members(&self, group_id: &GroupId) -> Result<Vec<GroupMember>, StoreError> {
        let state = self.state.read().await;
        let mut members: Vec<GroupMember> = state
            .group_members
            .values()
            .filter(|m| m.group_id == *group_id)
            .cloned()
            .collect();
        members.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.user_id.cmp(&b.user_id)));
        Ok(members)
    }

    async fn list_user_groups(&self, user_id: &UserId) -> Result<Vec<Group>, StoreError> {
        let state = self.state.read().await;
        let mut groups: Vec<Group> = state
            .group_members
            .values()
            .filter(|m| m.user_id == *user_id)
            .filter_map(|m| state.groups.get(&m.group_id).cloned())
            .collect();
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(groups)
    }

    async fn set_group_permission(
        &self,
        group_id: &GroupId,
        resource: &ResourceRef,
        level: Level,
    ) -> Result<GroupPermission, StoreError> {
        let mut state = self.state.write().await;
        if !state.groups.contains_key(group_id) {
            return Err(StoreError::NotFound);
        }
        let permission = state
            .group_permissions
            .entry((*group_id, *resource))
            .and_modify(|p| p.level = level)
            .or_insert_with(|| GroupPermission {
                group_id: *group_id,
                resource: *resource,
                level,
                created_at: Utc::now(),
            });
        Ok(permission.clone())
    }

    async fn get_group_permission(
        &self,
        group_id: &GroupId,
        resource: &ResourceRef,
    ) -> Result<GroupPermission, StoreError> {
        let state = self.state.read().await;
        state
            .group_permissions
            .get(&(*group_id, *resource))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list_group_permissions(
        &self,
        group_id: &GroupId,
    ) -> Result<Vec<GroupPermission>, StoreError> {
        let state = self.state.read().await;
        let mut permissions: Vec<GroupPermission> = state
            .group_permissions
            .values()
            .filter(|p| p.group_id == *group_id)
            .cloned()
            .collect();
        permissions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(permissions)
    }

    async fn remove_group_permission(
        &self,
        group_id: &GroupId,
        resource: &ResourceRef,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state
            .group_permissions
            .remove(&(*group_id, *resource))
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    // ───────────────────────────── Grants ─────────────────────────────

    async fn upsert_grant(&self, grant: &NewGrant) -> Result<PermissionGrant, StoreError> {
        let mut state = self.state.write().await;
        Ok(state.upsert_grant(grant))
    }

    async fn get_grant(&self, grant_id: &GrantId) -> Result<PermissionGrant, StoreError> {
        let state = self.state.read().await;
        state.grants.get(grant_id).cloned().ok_or(StoreError::NotFound)
    }

    async fn get_grant_by_key(&self, key: &GrantKey) -> Result<PermissionGrant, StoreError> {
        let state = self.state.read().await;
        state
            .grant_keys
            .get(key)
            .and_then(|id| state.grants.get(id))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list_resource_grants(
        &self,
        resource: &ResourceRef,
    ) -> Result<Vec<PermissionGrant>, StoreError> {
        let state = self.state.read().await;
        Ok(state.grants_where(|g| g.resource == *resource))
    }

    async fn list_principal_grants(
        &self,
        principal: &Principal,
        resources: &[ResourceRef],
    ) -> Result<Vec<PermissionGrant>, StoreError> {
        let state = self.state.read().await;
        Ok(state.grants_where(|g| g.principal == *principal && resources.contains(&g.resource)))
    }

    async fn list_grants_by_source(
        &self,
        source_id: &GrantId,
    ) -> Result<Vec<PermissionGrant>, StoreError> {
        let state = self.state.read().await;
        Ok(state.grants_where(|g| g.source_id == Some(*source_id)))
    }

    async fn update_grant_level(
        &self,
        grant_id: &GrantId,
        level: Level,
    ) -> Result<PermissionGrant, StoreError> {
        let mut state = self.state.write().await;
        let grant = state.grants.get_mut(grant_id).ok_or(StoreError::NotFound)?;
        grant.level = level;
        Ok(grant.clone())
    }

    async fn update_grants_by_source(
        &self,
        source_id: &GrantId,
        level: Level,
    ) -> Result<u64, StoreError> {
        let mut state = self.state.write().await;
        let mut updated = 0;
        for grant in state
            .grants
            .values_mut()
            .filter(|g| g.source_id == Some(*source_id))
        {
            grant.level = level;
            updated += 1;
        }
        Ok(updated)
    }

    async fn delete_grant(&self, grant_id: &GrantId) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let grant = state.grants.remove(grant_id).ok_or(StoreError::NotFound)?;
        state.grant_keys.remove(&grant.key());
        Ok(())
    }

    async fn delete_grants_by_source(&self, source_id: &GrantId) -> Result<u64, StoreError> {
        let mut state = self.state.write().await;
        let removed = state.remove_grants_where(|g| g.source_id == Some(*source_id));
        Ok(removed.len() as u64)
    }

    async fn delete_grants(
        &self,
        filter: &GrantFilter,
    ) -> Result<Vec<PermissionGrant>, StoreError> {
        let mut state = self.state.write().await;
        Ok(state.remove_grants_where(|g| filter.matches(g)))
    }

    async fn replace_inherited_grants(
        &self,
        resource: &ResourceRef,
        grants: &[NewGrant],
    ) -> Result<Vec<PermissionGrant>, StoreError> {
        let mut state = self.state.write().await;
        state.remove_grants_where(|g| g.resource == *resource && g.is_inherited());
        Ok(grants
            .iter()
            .filter(|g| g.resource == *resource)
            .map(|g| state.upsert_grant(g))
            .collect())
    }

    async fn delete_guest_grants(&self, guest_id: &GuestId) -> Result<u64, StoreError> {
        let mut state = self.state.write().await;
        let removed = state.remove_grants_where(|g| g.principal == Principal::Guest(*guest_id));
        Ok(removed.len() as u64)
    }

    // ───────────────────────────── Guests ─────────────────────────────

    async fn upsert_guest(&self, params: &UpsertGuestParams) -> Result<GuestGrant, StoreError> {
        let mut state = self.state.write().await;
        if !state.workspaces.contains_key(&params.workspace_id) {
            return Err(StoreError::NotFound);
        }
        let now = Utc::now();
        let key = (params.email.clone(), params.workspace_id);

        if let Some(guest) = state
            .guest_keys
            .get(&key)
            .copied()
            .and_then(|id| state.guests.get_mut(&id))
        {
            guest.status = params.status;
            guest.expires_at = params.expires_at;
            if params.invited_by_id.is_some() {
                guest.invited_by_id = params.invited_by_id;
            }
            guest.updated_at = now;
            return Ok(guest.clone());
        }

        let guest = GuestGrant {
            id: GuestId::new(),
            email: params.email.clone(),
            workspace_id: params.workspace_id,
            status: params.status,
            expires_at: params.expires_at,
            invited_by_id: params.invited_by_id,
            created_at: now,
            updated_at: now,
        };
        state.guest_keys.insert(key, guest.id);
        state.guests.insert(guest.id, guest.clone());
        Ok(guest)
    }

    async fn get_guest(&self, guest_id: &GuestId) -> Result<GuestGrant, StoreError> {
        let state = self.state.read().await;
        state.guests.get(guest_id).cloned().ok_or(StoreError::NotFound)
    }

    async fn list_expired_guests(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<GuestGrant>, StoreError> {
        let state = self.state.read().await;
        let mut guests: Vec<GuestGrant> = state
            .guests
            .values()
            .filter(|g| g.expires_at < now && g.status != GuestStatus::Expired)
            .cloned()
            .collect();
        guests.sort_by(|a, b| a.expires_at.cmp(&b.expires_at));
        Ok(guests)
    }

    async fn set_guest_status(
        &self,
        guest_id: &GuestId,
        status: GuestStatus,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let guest = state.guests.get_mut(guest_id).ok_or(StoreError::NotFound)?;
        guest.status = status;
        guest.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_guest_expired(
        &self,
        guest_id: &GuestId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let guest = state.guests.get_mut(guest_id).ok_or(StoreError::NotFound)?;
        if guest.status == GuestStatus::Expired || guest.expires_at >= now {
            return Ok(false);
        }
        guest.status = GuestStatus::Expired;
        guest.updated_at = now;
        Ok(true)
    }
}
