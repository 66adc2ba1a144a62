//! Group expansion: a group-level permission becomes one `GROUP` grant per member.
//!
//! A user keeps a single `GROUP` row per resource; when several of their groups
//! grant the same resource the row carries the highest level.

use std::collections::VecDeque;

use docperm_storage::{
    GrantFilter, GrantStore, GroupId, Level, NewGrant, PermissionGrant, Principal, ResourceRef,
    SourceType, StoreError, UserId,
};
use tracing::{debug, info};

use crate::propagator::Job;
use crate::{EngineError, GrantOutcome, PermissionEngine, SubtreeGuard};

/// Result of re-syncing one member's `GROUP` row.
enum Synced {
    Upserted(PermissionGrant),
    Removed(Vec<PermissionGrant>),
}

impl<S: GrantStore + 'static> PermissionEngine<S> {
    /// Record a group-level permission and expand it onto every member.
    pub async fn assign_group_permissions(
        &self,
        group_id: GroupId,
        resource: ResourceRef,
        level: Level,
        actor_id: Option<UserId>,
    ) -> Result<GrantOutcome, EngineError> {
        if level == Level::None {
            return Err(EngineError::InvalidArgument(
                "cannot assign level NONE to a group".to_string(),
            ));
        }
        let guard = self.lock_group_resource(group_id, &resource).await?;
        self.store
            .set_group_permission(&group_id, &resource, level)
            .await?;
        let outcome = self
            .expand_group(group_id, &resource, actor_id, guard)
            .await?;

        info!(
            group_id = %group_id,
            resource = %resource,
            level = level.as_str(),
            members = outcome.grants.len(),
            deferred = outcome.propagation.deferred,
            "Group permission assigned"
        );
        Ok(outcome)
    }

    /// Change the level of an existing group-level permission and re-expand it.
    pub async fn update_group_permissions(
        &self,
        group_id: GroupId,
        resource: ResourceRef,
        level: Level,
    ) -> Result<GrantOutcome, EngineError> {
        if level == Level::None {
            return Err(EngineError::InvalidArgument(
                "cannot set level NONE, remove the group permission instead".to_string(),
            ));
        }
        let guard = self.lock_group_resource(group_id, &resource).await?;
        self.store
            .get_group_permission(&group_id, &resource)
            .await
            .map_err(EngineError::lookup(format!(
                "permission of group {group_id} on {resource}"
            )))?;
        self.store
            .set_group_permission(&group_id, &resource, level)
            .await?;
        let outcome = self.expand_group(group_id, &resource, None, guard).await?;

        info!(
            group_id = %group_id,
            resource = %resource,
            level = level.as_str(),
            members = outcome.grants.len(),
            "Group permission updated"
        );
        Ok(outcome)
    }

    /// Drop a group-level permission. Members fall back to their other groups'
    /// level on the resource, or lose the `GROUP` row entirely.
    pub async fn remove_group_permissions(
        &self,
        group_id: GroupId,
        resource: ResourceRef,
    ) -> Result<GrantOutcome, EngineError> {
        let guard = self.lock_group_resource(group_id, &resource).await?;
        self.store
            .get_group_permission(&group_id, &resource)
            .await
            .map_err(EngineError::lookup(format!(
                "permission of group {group_id} on {resource}"
            )))?;
        self.store
            .remove_group_permission(&group_id, &resource)
            .await?;
        let outcome = self.expand_group(group_id, &resource, None, guard).await?;

        info!(
            group_id = %group_id,
            resource = %resource,
            kept = outcome.grants.len(),
            removed = outcome.removed.len(),
            "Group permission removed"
        );
        Ok(outcome)
    }

    /// Add a user to a group and expand every permission the group holds onto them.
    pub async fn add_group_member(
        &self,
        group_id: GroupId,
        user_id: UserId,
        actor_id: Option<UserId>,
    ) -> Result<GrantOutcome, EngineError> {
        let group = self
            .store
            .get_group(&group_id)
            .await
            .map_err(EngineError::lookup(format!("group {group_id}")))?;
        let guard = self.lock(group.workspace_id).await?;
        self.store.add_group_member(&group_id, &user_id).await?;

        let outcome = self
            .resync_member(group_id, user_id, actor_id, guard)
            .await?;
        info!(
            group_id = %group_id,
            user_id = %user_id,
            grants = outcome.grants.len(),
            "Group member added"
        );
        Ok(outcome)
    }

    /// Remove a user from a group and re-sync their `GROUP` rows.
    pub async fn remove_group_member(
        &self,
        group_id: GroupId,
        user_id: UserId,
    ) -> Result<GrantOutcome, EngineError> {
        let group = self
            .store
            .get_group(&group_id)
            .await
            .map_err(EngineError::lookup(format!("group {group_id}")))?;
        let guard = self.lock(group.workspace_id).await?;
        self.store
            .remove_group_member(&group_id, &user_id)
            .await
            .map_err(EngineError::lookup(format!(
                "user {user_id} in group {group_id}"
            )))?;

        let outcome = self.resync_member(group_id, user_id, None, guard).await?;
        info!(
            group_id = %group_id,
            user_id = %user_id,
            kept = outcome.grants.len(),
            removed = outcome.removed.len(),
            "Group member removed"
        );
        Ok(outcome)
    }

    /// Highest level any of the user's groups holds on `resource`.
    pub(crate) async fn group_level_for(
        &self,
        user_id: &UserId,
        resource: &ResourceRef,
    ) -> Result<Level, EngineError> {
        let mut level = Level::None;
        for group in self.store.list_user_groups(user_id).await? {
            match self.store.get_group_permission(&group.id, resource).await {
                Ok(permission) => level = level.max(permission.level),
                Err(StoreError::NotFound) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(level)
    }

    /// Validate that group and resource share a workspace, then lock it.
    async fn lock_group_resource(
        &self,
        group_id: GroupId,
        resource: &ResourceRef,
    ) -> Result<SubtreeGuard, EngineError> {
        let group = self
            .store
            .get_group(&group_id)
            .await
            .map_err(EngineError::lookup(format!("group {group_id}")))?;
        let workspace_id = self.workspace_of(resource).await?;
        if group.workspace_id != workspace_id {
            return Err(EngineError::InvalidArgument(format!(
                "group {group_id} and {resource} are in different workspaces"
            )));
        }
        self.lock(workspace_id).await
    }

    /// Re-sync every member's `GROUP` row on `resource` and fan out the survivors.
    async fn expand_group(
        &self,
        group_id: GroupId,
        resource: &ResourceRef,
        actor_id: Option<UserId>,
        guard: SubtreeGuard,
    ) -> Result<GrantOutcome, EngineError> {
        let mut outcome = GrantOutcome::default();
        for member in self.store.list_group_members(&group_id).await? {
            match self
                .sync_group_grant(&member.user_id, resource, actor_id)
                .await?
            {
                Synced::Upserted(grant) => outcome.grants.push(grant),
                Synced::Removed(rows) => outcome.removed.extend(rows),
            }
        }
        let queue: VecDeque<Job> = outcome.grants.iter().cloned().map(Job::fanout).collect();
        outcome.propagation = self.drive(queue, guard).await?;
        Ok(outcome)
    }

    /// Re-sync one user's `GROUP` rows on every resource `group_id` grants.
    async fn resync_member(
        &self,
        group_id: GroupId,
        user_id: UserId,
        actor_id: Option<UserId>,
        guard: SubtreeGuard,
    ) -> Result<GrantOutcome, EngineError> {
        let mut outcome = GrantOutcome::default();
        for permission in self.store.list_group_permissions(&group_id).await? {
            match self
                .sync_group_grant(&user_id, &permission.resource, actor_id)
                .await?
            {
                Synced::Upserted(grant) => outcome.grants.push(grant),
                Synced::Removed(rows) => outcome.removed.extend(rows),
            }
        }
        let queue: VecDeque<Job> = outcome.grants.iter().cloned().map(Job::fanout).collect();
        outcome.propagation = self.drive(queue, guard).await?;
        Ok(outcome)
    }

    /// Bring the user's `GROUP` row on `resource` in line with their groups.
    /// Caller holds the workspace lock.
    async fn sync_group_grant(
        &self,
        user_id: &UserId,
        resource: &ResourceRef,
        actor_id: Option<UserId>,
    ) -> Result<Synced, EngineError> {
        let principal = Principal::User(*user_id);
        let level = self.group_level_for(user_id, resource).await?;

        if level == Level::None {
            let removed = self
                .store
                .delete_grants(&GrantFilter {
                    resource: Some(*resource),
                    principal: Some(principal),
                    source_types: vec![SourceType::Group],
                    level: None,
                })
                .await?;
            let cascaded = self.cleanup_children(&removed).await?;
            debug!(user_id = %user_id, resource = %resource, cascaded, "Group grant dropped");
            return Ok(Synced::Removed(removed));
        }

        let grant = self
            .store
            .upsert_grant(&NewGrant {
                principal,
                resource: *resource,
                level,
                source_type: SourceType::Group,
                source_id: None,
                created_by_id: actor_id,
            })
            .await?;
        debug!(user_id = %user_id, resource = %resource, level = level.as_str(), "Group grant synced");
        Ok(Synced::Upserted(grant))
    }
}
