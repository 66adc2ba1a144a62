//! Role-derived grants: workspace/subspace membership and subspace visibility types.

use std::collections::VecDeque;

use docperm_storage::{
    GrantFilter, GrantStore, Level, NewGrant, Principal, ResourceRef, SourceType, StoreError,
    SubspaceId, SubspaceRole, SubspaceType, UserId, WorkspaceId, WorkspaceRole,
};
use tracing::info;

use crate::propagator::Job;
use crate::{EngineError, GrantOutcome, PermissionEngine};

/// Source kind and level a workspace role confers on the workspace.
pub fn workspace_role_grant(role: WorkspaceRole) -> (SourceType, Level) {
    match role {
        WorkspaceRole::Owner => (SourceType::WorkspaceAdmin, Level::Owner),
        WorkspaceRole::Admin => (SourceType::WorkspaceAdmin, Level::Manage),
        WorkspaceRole::Member => (SourceType::WorkspaceMember, Level::Read),
    }
}

/// Source kind and level a subspace role confers on the subspace and its documents.
pub fn subspace_role_grant(role: SubspaceRole) -> (SourceType, Level) {
    match role {
        SubspaceRole::Admin => (SourceType::SubspaceAdmin, Level::Manage),
        SubspaceRole::Member => (SourceType::SubspaceMember, Level::Read),
    }
}

const WORKSPACE_ROLE_SOURCES: [SourceType; 2] =
    [SourceType::WorkspaceAdmin, SourceType::WorkspaceMember];
const SUBSPACE_ROLE_SOURCES: [SourceType; 2] =
    [SourceType::SubspaceAdmin, SourceType::SubspaceMember];

impl<S: GrantStore + 'static> PermissionEngine<S> {
    /// Record a workspace role and (re)issue the role grant, replacing the grant
    /// of the other role kind if the user had one.
    pub async fn assign_workspace_permissions(
        &self,
        workspace_id: WorkspaceId,
        user_id: UserId,
        role: WorkspaceRole,
        actor_id: Option<UserId>,
    ) -> Result<GrantOutcome, EngineError> {
        self.store
            .get_workspace(&workspace_id)
            .await
            .map_err(EngineError::lookup(format!("workspace {workspace_id}")))?;
        let guard = self.lock(workspace_id).await?;

        self.store
            .add_workspace_member(&workspace_id, &user_id, role)
            .await?;
        let (source_type, level) = workspace_role_grant(role);
        let mut outcome = self
            .replace_role_grant(
                Principal::User(user_id),
                ResourceRef::Workspace(workspace_id),
                source_type,
                level,
                &WORKSPACE_ROLE_SOURCES,
                actor_id,
            )
            .await?;

        let queue = outcome.grants.iter().cloned().map(Job::fanout).collect();
        outcome.propagation = self.drive(queue, guard).await?;

        info!(
            workspace_id = %workspace_id,
            user_id = %user_id,
            role = role.as_str(),
            deferred = outcome.propagation.deferred,
            "Workspace role granted"
        );
        Ok(outcome)
    }

    /// Record a subspace role and (re)issue the role grant.
    pub async fn assign_subspace_permissions(
        &self,
        subspace_id: SubspaceId,
        user_id: UserId,
        role: SubspaceRole,
        actor_id: Option<UserId>,
    ) -> Result<GrantOutcome, EngineError> {
        let subspace = self
            .store
            .get_subspace(&subspace_id)
            .await
            .map_err(EngineError::lookup(format!("subspace {subspace_id}")))?;
        let guard = self.lock(subspace.workspace_id).await?;

        self.store
            .add_subspace_member(&subspace_id, &user_id, role)
            .await?;
        let (source_type, level) = subspace_role_grant(role);
        let mut outcome = self
            .replace_role_grant(
                Principal::User(user_id),
                ResourceRef::Subspace(subspace_id),
                source_type,
                level,
                &SUBSPACE_ROLE_SOURCES,
                actor_id,
            )
            .await?;

        let queue = outcome.grants.iter().cloned().map(Job::fanout).collect();
        outcome.propagation = self.drive(queue, guard).await?;

        info!(
            subspace_id = %subspace_id,
            user_id = %user_id,
            role = role.as_str(),
            deferred = outcome.propagation.deferred,
            "Subspace role granted"
        );
        Ok(outcome)
    }

    /// Drop a user's workspace role grants (single-hop cleanup) and membership.
    pub async fn revoke_workspace_permissions(
        &self,
        workspace_id: WorkspaceId,
        user_id: UserId,
    ) -> Result<GrantOutcome, EngineError> {
        self.store
            .get_workspace(&workspace_id)
            .await
            .map_err(EngineError::lookup(format!("workspace {workspace_id}")))?;
        let _guard = self.lock(workspace_id).await?;

        let removed = self
            .store
            .delete_grants(&GrantFilter {
                resource: Some(ResourceRef::Workspace(workspace_id)),
                principal: Some(Principal::User(user_id)),
                source_types: WORKSPACE_ROLE_SOURCES.to_vec(),
                level: None,
            })
            .await?;
        let cascaded = self.cleanup_children(&removed).await?;
        match self
            .store
            .remove_workspace_member(&workspace_id, &user_id)
            .await
        {
            Ok(()) | Err(StoreError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }

        info!(
            workspace_id = %workspace_id,
            user_id = %user_id,
            removed = removed.len(),
            cascaded,
            "Workspace role revoked"
        );
        Ok(GrantOutcome {
            removed,
            ..Default::default()
        })
    }

    /// Drop a user's subspace role grants (single-hop cleanup) and membership.
    pub async fn revoke_subspace_permissions(
        &self,
        subspace_id: SubspaceId,
        user_id: UserId,
    ) -> Result<GrantOutcome, EngineError> {
        let subspace = self
            .store
            .get_subspace(&subspace_id)
            .await
            .map_err(EngineError::lookup(format!("subspace {subspace_id}")))?;
        let _guard = self.lock(subspace.workspace_id).await?;

        let removed = self
            .store
            .delete_grants(&GrantFilter {
                resource: Some(ResourceRef::Subspace(subspace_id)),
                principal: Some(Principal::User(user_id)),
                source_types: SUBSPACE_ROLE_SOURCES.to_vec(),
                level: None,
            })
            .await?;
        let cascaded = self.cleanup_children(&removed).await?;
        match self
            .store
            .remove_subspace_member(&subspace_id, &user_id)
            .await
        {
            Ok(()) | Err(StoreError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }

        info!(
            subspace_id = %subspace_id,
            user_id = %user_id,
            removed = removed.len(),
            cascaded,
            "Subspace role revoked"
        );
        Ok(GrantOutcome {
            removed,
            ..Default::default()
        })
    }

    /// Re-issue role-derived subspace grants after a visibility type change.
    ///
    /// Grants characteristic of `old_type` are removed (single-hop cleanup), then
    /// the standard assignment for `new_type` is applied and propagated.
    pub async fn update_subspace_type_permissions(
        &self,
        subspace_id: SubspaceId,
        old_type: SubspaceType,
        new_type: SubspaceType,
        workspace_id: WorkspaceId,
        actor_id: Option<UserId>,
    ) -> Result<GrantOutcome, EngineError> {
        let subspace = self
            .store
            .get_subspace(&subspace_id)
            .await
            .map_err(EngineError::lookup(format!("subspace {subspace_id}")))?;
        if subspace.workspace_id != workspace_id {
            return Err(EngineError::InvalidArgument(format!(
                "subspace {subspace_id} is not in workspace {workspace_id}"
            )));
        }
        let guard = self.lock(workspace_id).await?;

        self.store.set_subspace_type(&subspace_id, new_type).await?;

        let resource = ResourceRef::Subspace(subspace_id);
        let stale = match old_type {
            SubspaceType::WorkspaceWide => Some(GrantFilter {
                resource: Some(resource),
                source_types: WORKSPACE_ROLE_SOURCES.to_vec(),
                ..Default::default()
            }),
            SubspaceType::Public => Some(GrantFilter {
                resource: Some(resource),
                source_types: vec![SourceType::WorkspaceMember],
                level: Some(Level::Comment),
                ..Default::default()
            }),
            SubspaceType::InviteOnly | SubspaceType::Private => None,
        };
        let removed = match stale {
            Some(filter) => self.store.delete_grants(&filter).await?,
            None => Vec::new(),
        };
        self.cleanup_children(&removed).await?;

        let creator = subspace.created_by_id;
        let mut wanted: Vec<(UserId, SourceType, Level)> = Vec::new();
        match new_type {
            SubspaceType::WorkspaceWide => {
                for member in self.store.list_workspace_members(&workspace_id).await? {
                    let (source_type, level) = workspace_role_grant(member.role);
                    wanted.push((member.user_id, source_type, level));
                }
            }
            SubspaceType::Public => {
                wanted.push((creator, SourceType::SubspaceAdmin, Level::Manage));
                for member in self.store.list_workspace_members(&workspace_id).await? {
                    if member.user_id != creator {
                        wanted.push((member.user_id, SourceType::WorkspaceMember, Level::Comment));
                    }
                }
            }
            SubspaceType::InviteOnly | SubspaceType::Private => {
                wanted.push((creator, SourceType::SubspaceAdmin, Level::Manage));
            }
        }

        let mut grants = Vec::with_capacity(wanted.len());
        for (user_id, source_type, level) in wanted {
            let grant = self
                .store
                .upsert_grant(&NewGrant {
                    principal: Principal::User(user_id),
                    resource,
                    level,
                    source_type,
                    source_id: None,
                    created_by_id: actor_id,
                })
                .await?;
            grants.push(grant);
        }

        let queue: VecDeque<Job> = grants.iter().cloned().map(Job::fanout).collect();
        let propagation = self.drive(queue, guard).await?;

        info!(
            subspace_id = %subspace_id,
            old_type = old_type.as_str(),
            new_type = new_type.as_str(),
            removed = removed.len(),
            granted = grants.len(),
            deferred = propagation.deferred,
            "Subspace type permissions updated"
        );
        Ok(GrantOutcome {
            grants,
            removed,
            propagation,
        })
    }

    /// Delete the principal's role grants of the other kind on `resource`, then
    /// upsert the new role grant. Caller holds the workspace lock.
    async fn replace_role_grant(
        &self,
        principal: Principal,
        resource: ResourceRef,
        source_type: SourceType,
        level: Level,
        role_sources: &[SourceType],
        actor_id: Option<UserId>,
    ) -> Result<GrantOutcome, EngineError> {
        let others: Vec<SourceType> = role_sources
            .iter()
            .copied()
            .filter(|s| *s != source_type)
            .collect();
        let removed = self
            .store
            .delete_grants(&GrantFilter {
                resource: Some(resource),
                principal: Some(principal),
                source_types: others,
                level: None,
            })
            .await?;
        self.cleanup_children(&removed).await?;

        let grant = self
            .store
            .upsert_grant(&NewGrant {
                principal,
                resource,
                level,
                source_type,
                source_id: None,
                created_by_id: actor_id,
            })
            .await?;

        Ok(GrantOutcome {
            grants: vec![grant],
            removed,
            ..Default::default()
        })
    }
}
