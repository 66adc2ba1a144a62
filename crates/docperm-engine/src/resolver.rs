//! Read path: effective permission of a principal on one or many resources.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::Utc;
use docperm_storage::{
    DocumentId, GrantStore, GuestId, Level, PermissionGrant, Principal, ResourceRef, StoreError,
    UserId,
};
use tracing::debug;

use crate::level_map::map_level;
use crate::priority::priority_of;
use crate::{EngineError, PermissionEngine};

/// Order two grants at the same hierarchy level: lower priority rank first,
/// then higher level, then most recent.
fn precedence(a: &PermissionGrant, b: &PermissionGrant) -> Ordering {
    priority_of(a.source_type)
        .cmp(&priority_of(b.source_type))
        .then_with(|| b.level.cmp(&a.level))
        .then_with(|| b.created_at.cmp(&a.created_at))
}

/// Effective level on `target`, given its ancestry (most specific first) and the
/// principal's grants on any of those resources.
///
/// The first ancestry level holding any grant decides; levels are never merged.
pub(crate) fn effective_level(
    target: &ResourceRef,
    ancestry: &[ResourceRef],
    grants: &[PermissionGrant],
) -> Level {
    for consulted in ancestry {
        let winner = grants
            .iter()
            .filter(|g| g.resource == *consulted)
            .min_by(|a, b| precedence(a, b));
        if let Some(grant) = winner {
            return map_level(
                target.resource_type(),
                consulted.resource_type(),
                grant.level,
            );
        }
    }
    Level::None
}

impl<S: GrantStore + 'static> PermissionEngine<S> {
    /// Effective level of `principal` on `resource`.
    pub async fn resolve_effective_permission(
        &self,
        principal: &Principal,
        resource: &ResourceRef,
    ) -> Result<Level, EngineError> {
        let ancestry = self.ancestry_of(resource).await?;
        if !self.principal_usable(principal).await? {
            return Ok(Level::None);
        }
        let grants = self
            .store
            .list_principal_grants(principal, &ancestry)
            .await?;
        let level = effective_level(resource, &ancestry, &grants);
        debug!(principal = %principal.key(), resource = %resource, level = level.as_str(), "Resolved permission");
        Ok(level)
    }

    /// Effective level of a principal given as loose `(user_id, guest_id)` parts.
    pub async fn resolve_permission(
        &self,
        user_id: Option<UserId>,
        guest_id: Option<GuestId>,
        resource: &ResourceRef,
    ) -> Result<Level, EngineError> {
        let principal = Principal::from_parts(user_id, guest_id)?;
        self.resolve_effective_permission(&principal, resource).await
    }

    pub async fn resolve_user_permission(
        &self,
        user_id: UserId,
        resource: &ResourceRef,
    ) -> Result<Level, EngineError> {
        self.resolve_effective_permission(&Principal::User(user_id), resource)
            .await
    }

    /// Resolve many resources with a single grant query.
    ///
    /// Unknown documents, subspaces or workspaces resolve to `NONE`.
    pub async fn batch_resolve_effective_permissions(
        &self,
        principal: &Principal,
        resources: &[ResourceRef],
    ) -> Result<HashMap<ResourceRef, Level>, EngineError> {
        let mut out: HashMap<ResourceRef, Level> =
            resources.iter().map(|r| (*r, Level::None)).collect();
        if resources.is_empty() || !self.principal_usable(principal).await? {
            return Ok(out);
        }

        let document_ids: Vec<DocumentId> = resources
            .iter()
            .filter_map(|r| match r {
                ResourceRef::Document(id) => Some(*id),
                _ => None,
            })
            .collect();
        let documents = self.store.get_documents(&document_ids).await?;

        let mut ancestries: Vec<(ResourceRef, Vec<ResourceRef>)> = Vec::new();
        for document in &documents {
            ancestries.push((ResourceRef::Document(document.id), document.ancestry()));
        }
        for resource in resources {
            match resource {
                ResourceRef::Document(_) => {}
                ResourceRef::Subspace(id) => match self.store.get_subspace(id).await {
                    Ok(subspace) => ancestries.push((
                        *resource,
                        vec![*resource, ResourceRef::Workspace(subspace.workspace_id)],
                    )),
                    Err(StoreError::NotFound) => {}
                    Err(e) => return Err(e.into()),
                },
                ResourceRef::Workspace(_) => ancestries.push((*resource, vec![*resource])),
            }
        }

        let mut union: Vec<ResourceRef> = ancestries
            .iter()
            .flat_map(|(_, chain)| chain.iter().copied())
            .collect();
        union.sort_by_key(|r| (r.resource_type().as_str(), r.id()));
        union.dedup();

        let grants = self.store.list_principal_grants(principal, &union).await?;
        let mut by_resource: HashMap<ResourceRef, Vec<PermissionGrant>> = HashMap::new();
        for grant in grants {
            by_resource.entry(grant.resource).or_default().push(grant);
        }

        for (target, chain) in ancestries {
            let relevant: Vec<PermissionGrant> = chain
                .iter()
                .filter_map(|r| by_resource.get(r))
                .flatten()
                .cloned()
                .collect();
            out.insert(target, effective_level(&target, &chain, &relevant));
        }
        Ok(out)
    }

    /// Batch resolution for a user over a listing of documents.
    pub async fn batch_resolve_user_permissions_for_documents(
        &self,
        user_id: UserId,
        document_ids: &[DocumentId],
    ) -> Result<HashMap<DocumentId, Level>, EngineError> {
        let resources: Vec<ResourceRef> = document_ids
            .iter()
            .map(|id| ResourceRef::Document(*id))
            .collect();
        let resolved = self
            .batch_resolve_effective_permissions(&Principal::User(user_id), &resources)
            .await?;
        Ok(document_ids
            .iter()
            .map(|id| {
                let level = resolved
                    .get(&ResourceRef::Document(*id))
                    .copied()
                    .unwrap_or(Level::None);
                (*id, level)
            })
            .collect())
    }

    /// Resources consulted for `resource`, most specific first.
    async fn ancestry_of(&self, resource: &ResourceRef) -> Result<Vec<ResourceRef>, EngineError> {
        match resource {
            ResourceRef::Document(id) => Ok(self
                .store
                .get_document(id)
                .await
                .map_err(EngineError::lookup(format!("document {id}")))?
                .ancestry()),
            ResourceRef::Subspace(id) => {
                let subspace = self
                    .store
                    .get_subspace(id)
                    .await
                    .map_err(EngineError::lookup(format!("subspace {id}")))?;
                Ok(vec![*resource, ResourceRef::Workspace(subspace.workspace_id)])
            }
            ResourceRef::Workspace(id) => {
                self.store
                    .get_workspace(id)
                    .await
                    .map_err(EngineError::lookup(format!("workspace {id}")))?;
                Ok(vec![*resource])
            }
        }
    }

    /// Users always are; guests only while active and unexpired.
    async fn principal_usable(&self, principal: &Principal) -> Result<bool, EngineError> {
        match principal {
            Principal::User(_) => Ok(true),
            Principal::Guest(id) => match self.store.get_guest(id).await {
                Ok(guest) => Ok(guest.is_usable_at(Utc::now())),
                Err(StoreError::NotFound) => Ok(false),
                Err(e) => Err(e.into()),
            },
        }
    }
}
