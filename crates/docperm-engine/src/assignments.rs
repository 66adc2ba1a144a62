//! Direct (explicit) grants: assign, change level, remove.

use std::collections::VecDeque;

use docperm_storage::{
    GrantId, GrantStore, Level, NewGrant, PermissionGrant, Principal, ResourceRef, SourceType,
};
use tracing::info;

use crate::propagator::Job;
use crate::{AssignPermission, EngineError, GrantOutcome, PermissionEngine, SubtreeGuard};

impl<S: GrantStore + 'static> PermissionEngine<S> {
    /// Write a `DIRECT` grant (or `GUEST` grant for a guest) and fan it out.
    ///
    /// Guest grants never propagate. Re-assigning replaces the level in place.
    pub async fn assign_user_permission(
        &self,
        request: AssignPermission,
    ) -> Result<GrantOutcome, EngineError> {
        let principal = Principal::from_parts(request.user_id, request.guest_id)?;
        if request.level == Level::None {
            return Err(EngineError::InvalidArgument(
                "cannot assign level NONE, remove the grant instead".to_string(),
            ));
        }

        let workspace_id = self.workspace_of(&request.resource).await?;
        let source_type = match principal {
            Principal::User(_) => SourceType::Direct,
            Principal::Guest(guest_id) => {
                let guest = self
                    .store
                    .get_guest(&guest_id)
                    .await
                    .map_err(EngineError::lookup(format!("guest {guest_id}")))?;
                if guest.workspace_id != workspace_id {
                    return Err(EngineError::InvalidArgument(format!(
                        "guest {guest_id} belongs to another workspace"
                    )));
                }
                if !matches!(request.resource, ResourceRef::Document(_)) {
                    return Err(EngineError::InvalidArgument(
                        "guests can only be granted documents".to_string(),
                    ));
                }
                SourceType::Guest
            }
        };

        let guard = self.lock(workspace_id).await?;
        let grant = self
            .store
            .upsert_grant(&NewGrant {
                principal,
                resource: request.resource,
                level: request.level,
                source_type,
                source_id: None,
                created_by_id: request.created_by_id,
            })
            .await?;

        let queue = match principal {
            Principal::User(_) => VecDeque::from([Job::fanout(grant.clone())]),
            Principal::Guest(_) => VecDeque::new(),
        };
        let propagation = self.drive(queue, guard).await?;

        info!(
            principal = %principal.key(),
            resource = %request.resource,
            level = request.level.as_str(),
            grant_id = %grant.id,
            deferred = propagation.deferred,
            "Permission assigned"
        );
        Ok(GrantOutcome {
            grants: vec![grant],
            removed: Vec::new(),
            propagation,
        })
    }

    /// Change a grant's level and the level of the rows propagated from it (one hop).
    pub async fn update_permission(
        &self,
        grant_id: GrantId,
        level: Level,
    ) -> Result<GrantOutcome, EngineError> {
        if level == Level::None {
            return Err(EngineError::InvalidArgument(
                "cannot set level NONE, remove the grant instead".to_string(),
            ));
        }
        let (existing, _guard) = self.lock_grant(grant_id).await?;

        let grant = self.store.update_grant_level(&grant_id, level).await?;
        let updated = self.store.update_grants_by_source(&grant_id, level).await?;

        info!(
            grant_id = %grant_id,
            from = existing.level.as_str(),
            to = level.as_str(),
            updated,
            "Permission updated"
        );
        Ok(GrantOutcome {
            grants: vec![grant],
            ..Default::default()
        })
    }

    /// Delete a grant and the rows propagated from it (one hop).
    pub async fn remove_permission(&self, grant_id: GrantId) -> Result<GrantOutcome, EngineError> {
        let (existing, _guard) = self.lock_grant(grant_id).await?;

        self.store.delete_grant(&grant_id).await?;
        let cascaded = self.store.delete_grants_by_source(&grant_id).await?;

        info!(grant_id = %grant_id, cascaded, "Permission removed");
        Ok(GrantOutcome {
            removed: vec![existing],
            ..Default::default()
        })
    }

    /// Lock the workspace of a grant, then re-read the grant under the lock.
    async fn lock_grant(
        &self,
        grant_id: GrantId,
    ) -> Result<(PermissionGrant, SubtreeGuard), EngineError> {
        let lookup = || EngineError::lookup(format!("grant {grant_id}"));
        let grant = self.store.get_grant(&grant_id).await.map_err(lookup())?;
        let workspace_id = self.workspace_of(&grant.resource).await?;
        let guard = self.lock(workspace_id).await?;
        let grant = self.store.get_grant(&grant_id).await.map_err(lookup())?;
        Ok((grant, guard))
    }
}
