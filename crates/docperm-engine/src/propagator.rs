//! Fan-out of inherited grants down the tree, and re-derivation after moves.
//!
//! Descent is an explicit worklist, never recursion. Each job rewrites one
//! resource and enqueues its children, so a crash leaves a prefix of the tree
//! done and a retry converges through the keyed upserts.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use docperm_storage::{
    Document, DocumentId, GrantId, GrantKey, GrantStore, Level, NewGrant, PermissionGrant,
    Principal, ResourceRef, SourceType, StoreError, SubspaceId, WorkspaceId,
};
use tracing::{debug, info, warn};

use crate::roles::subspace_role_grant;
use crate::{EngineError, PermissionEngine, PropagationReport};

pub(crate) enum Job {
    /// Copy `origin` (a grant on `resource`) onto each child of `resource`.
    Fanout {
        resource: ResourceRef,
        origin: PermissionGrant,
        depth: usize,
    },
    /// Rebuild every inherited row of a moved document from its new position.
    Rederive {
        document: DocumentId,
        parent: Option<DocumentId>,
        subspace: Option<SubspaceId>,
        depth: usize,
    },
}

impl Job {
    pub(crate) fn fanout(origin: PermissionGrant) -> Self {
        Job::Fanout {
            resource: origin.resource,
            origin,
            depth: 0,
        }
    }
}

pub(crate) struct Propagator<S> {
    store: Arc<S>,
    max_depth: usize,
}

impl<S: GrantStore> Propagator<S> {
    pub(crate) fn new(store: Arc<S>, max_depth: usize) -> Self {
        Self { store, max_depth }
    }

    /// Process jobs until the queue is empty or `budget` jobs have run.
    pub(crate) async fn run(
        &self,
        queue: &mut VecDeque<Job>,
        budget: Option<usize>,
        report: &mut PropagationReport,
    ) -> Result<(), EngineError> {
        let mut processed = 0usize;
        while budget.is_none_or(|b| processed < b) {
            let Some(job) = queue.pop_front() else {
                break;
            };
            processed += 1;
            match job {
                Job::Fanout {
                    resource,
                    origin,
                    depth,
                } => self.fanout(resource, origin, depth, queue, report).await?,
                Job::Rederive {
                    document,
                    parent,
                    subspace,
                    depth,
                } => {
                    self.rederive(document, parent, subspace, depth, queue, report)
                        .await?
                }
            }
        }
        Ok(())
    }

    async fn children_of(&self, resource: &ResourceRef) -> Result<Vec<ResourceRef>, EngineError> {
        let children = match resource {
            ResourceRef::Workspace(id) => self
                .store
                .list_subspaces(id)
                .await?
                .into_iter()
                .map(|s| ResourceRef::Subspace(s.id))
                .collect(),
            ResourceRef::Subspace(id) => self
                .store
                .list_subspace_root_documents(id)
                .await?
                .into_iter()
                .map(|d| ResourceRef::Document(d.id))
                .collect(),
            ResourceRef::Document(id) => self
                .store
                .list_child_documents(id)
                .await?
                .into_iter()
                .map(|d| ResourceRef::Document(d.id))
                .collect(),
        };
        Ok(children)
    }

    async fn fanout(
        &self,
        resource: ResourceRef,
        origin: PermissionGrant,
        depth: usize,
        queue: &mut VecDeque<Job>,
        report: &mut PropagationReport,
    ) -> Result<(), EngineError> {
        // Guests see exactly the documents they were invited to
        if origin.source_type == SourceType::Guest {
            return Ok(());
        }

        let children = self.children_of(&resource).await?;
        if children.is_empty() {
            return Ok(());
        }
        if depth >= self.max_depth {
            warn!(
                resource = %resource,
                origin_id = %origin.id,
                depth,
                "Fan-out depth cap reached; descendants left untouched"
            );
            report.truncated = true;
            return Ok(());
        }

        for child in children {
            let row = self
                .store
                .upsert_grant(&NewGrant::inherited_from(&origin, child))
                .await?;
            if row.source_id != Some(origin.id) {
                warn!(
                    resource = %child,
                    grant_id = %row.id,
                    origin_id = %origin.id,
                    "Explicit grant with the same source kind kept; not descending"
                );
                continue;
            }
            debug!(resource = %child, grant_id = %row.id, level = row.level.as_str(), "Inherited grant written");
            report.nodes += 1;
            report.upserted += 1;
            queue.push_back(Job::Fanout {
                resource: child,
                origin: row,
                depth: depth + 1,
            });
        }
        Ok(())
    }

    /// Role-derived rows a document gets from sitting in `subspace_id`, each tied
    /// to the member's subspace-level role grant (created when missing).
    async fn subspace_member_grants(
        &self,
        document: ResourceRef,
        subspace_id: SubspaceId,
    ) -> Result<Vec<NewGrant>, EngineError> {
        let members = self.store.list_subspace_members(&subspace_id).await?;
        let mut grants = Vec::with_capacity(members.len());
        for member in members {
            let (source_type, level) = subspace_role_grant(member.role);
            let key = GrantKey {
                principal: Principal::User(member.user_id),
                resource: ResourceRef::Subspace(subspace_id),
                source_type,
            };
            let role_grant = match self.store.get_grant_by_key(&key).await {
                Ok(grant) => grant,
                Err(StoreError::NotFound) => {
                    self.store
                        .upsert_grant(&NewGrant {
                            principal: key.principal,
                            resource: key.resource,
                            level,
                            source_type,
                            source_id: None,
                            created_by_id: None,
                        })
                        .await?
                }
                Err(e) => return Err(e.into()),
            };
            grants.push(NewGrant {
                principal: key.principal,
                resource: document,
                level,
                source_type,
                source_id: Some(role_grant.id),
                created_by_id: role_grant.created_by_id,
            });
        }
        Ok(grants)
    }

    async fn rederive(
        &self,
        document: DocumentId,
        parent: Option<DocumentId>,
        subspace: Option<SubspaceId>,
        depth: usize,
        queue: &mut VecDeque<Job>,
        report: &mut PropagationReport,
    ) -> Result<(), EngineError> {
        if depth > self.max_depth {
            warn!(document_id = %document, depth, "Move depth cap reached; subtree left untouched");
            report.truncated = true;
            return Ok(());
        }

        let target = ResourceRef::Document(document);
        let mut wanted: Vec<NewGrant> = Vec::new();

        if let Some(parent_id) = parent {
            for grant in self
                .store
                .list_resource_grants(&ResourceRef::Document(parent_id))
                .await?
            {
                if grant.source_type != SourceType::Guest {
                    wanted.push(NewGrant::inherited_from(&grant, target));
                }
            }
        }

        if let Some(subspace_id) = subspace {
            if parent.is_none() {
                // Subspace root: same rows subspace fan-out would have produced
                for grant in self
                    .store
                    .list_resource_grants(&ResourceRef::Subspace(subspace_id))
                    .await?
                {
                    if grant.source_type != SourceType::Guest {
                        wanted.push(NewGrant::inherited_from(&grant, target));
                    }
                }
            }
            wanted.extend(self.subspace_member_grants(target, subspace_id).await?);
        }

        // One row per key; later sources win
        let mut seen = HashSet::new();
        let mut unique: Vec<NewGrant> = wanted
            .into_iter()
            .rev()
            .filter(|g| seen.insert(g.key()))
            .collect();
        unique.reverse();

        let written = self.store.replace_inherited_grants(&target, &unique).await?;
        debug!(document_id = %document, rows = written.len(), "Inherited grants re-derived");
        report.nodes += 1;
        report.upserted += written.len();

        // Grants only: children are re-derived where the store says they sit
        for child in self.store.list_child_documents(&document).await? {
            queue.push_back(Job::Rederive {
                document: child.id,
                parent: Some(document),
                subspace: child.subspace_id,
                depth: depth + 1,
            });
        }
        Ok(())
    }
}

impl<S: GrantStore + 'static> PermissionEngine<S> {
    /// Copy grant `origin_grant_id` onto every descendant of `resource`.
    ///
    /// Idempotent: running it twice leaves the same inherited rows as running it once.
    pub async fn propagate(
        &self,
        resource: ResourceRef,
        origin_grant_id: GrantId,
    ) -> Result<PropagationReport, EngineError> {
        let workspace_id = self.workspace_of(&resource).await?;
        let guard = self.lock(workspace_id).await?;

        let origin = self
            .store
            .get_grant(&origin_grant_id)
            .await
            .map_err(EngineError::lookup(format!("grant {origin_grant_id}")))?;
        if self.workspace_of(&origin.resource).await? != workspace_id {
            return Err(EngineError::InvalidArgument(format!(
                "grant {origin_grant_id} belongs to another workspace than {resource}"
            )));
        }
        let report = self
            .drive(
                VecDeque::from([Job::Fanout {
                    resource,
                    origin,
                    depth: 0,
                }]),
                guard,
            )
            .await?;

        info!(
            resource = %resource,
            origin_id = %origin_grant_id,
            upserted = report.upserted,
            deferred = report.deferred,
            "Grant propagated"
        );
        Ok(report)
    }

    /// Set the level of every row propagated directly from `origin_grant_id`.
    ///
    /// Single hop: rows further down point at intermediate grants and are left alone.
    pub async fn update_inherited_permissions(
        &self,
        origin_grant_id: GrantId,
        level: Level,
    ) -> Result<u64, EngineError> {
        let Some(workspace_id) = self.workspace_of_linked(&origin_grant_id).await? else {
            return Ok(0);
        };
        let _guard = self.lock(workspace_id).await?;
        let updated = self
            .store
            .update_grants_by_source(&origin_grant_id, level)
            .await?;
        info!(origin_id = %origin_grant_id, updated, level = level.as_str(), "Inherited grants updated");
        Ok(updated)
    }

    /// Delete every row propagated directly from `origin_grant_id` (single hop).
    pub async fn cleanup_inherited_permissions(
        &self,
        origin_grant_id: GrantId,
    ) -> Result<u64, EngineError> {
        let Some(workspace_id) = self.workspace_of_linked(&origin_grant_id).await? else {
            return Ok(0);
        };
        let _guard = self.lock(workspace_id).await?;
        let removed = self.store.delete_grants_by_source(&origin_grant_id).await?;
        info!(origin_id = %origin_grant_id, removed, "Inherited grants removed");
        Ok(removed)
    }

    /// Rebuild the inherited rows of `document_id` and its subtree after a move.
    ///
    /// Grants only: the document must already sit at its new position in the
    /// store, and its descendants are re-derived in whatever subspace they are
    /// stored in. `new_subspace_id` defaults to the new parent's subspace. Use
    /// [`PermissionEngine::move_document`] to move and re-derive in one call.
    pub async fn update_permissions_on_move(
        &self,
        document_id: DocumentId,
        new_parent_id: Option<DocumentId>,
        new_subspace_id: Option<SubspaceId>,
    ) -> Result<PropagationReport, EngineError> {
        let document = self
            .store
            .get_document(&document_id)
            .await
            .map_err(EngineError::lookup(format!("document {document_id}")))?;
        let guard = self.lock(document.workspace_id).await?;
        let subspace = self
            .check_move(&document, new_parent_id, new_subspace_id)
            .await?;
        self.rederive_from(document_id, new_parent_id, subspace, guard)
            .await
    }

    /// Re-parent a document in the store, then re-derive its subtree's grants.
    ///
    /// With a new parent the document lands in the parent's subspace; passing a
    /// different `new_subspace_id` is rejected. Descendants follow the document
    /// into its new subspace.
    pub async fn move_document(
        &self,
        document_id: DocumentId,
        new_parent_id: Option<DocumentId>,
        new_subspace_id: Option<SubspaceId>,
    ) -> Result<PropagationReport, EngineError> {
        let document = self
            .store
            .get_document(&document_id)
            .await
            .map_err(EngineError::lookup(format!("document {document_id}")))?;
        let guard = self.lock(document.workspace_id).await?;
        // Re-read under the lock; a concurrent move may have re-homed it
        let document = self
            .store
            .get_document(&document_id)
            .await
            .map_err(EngineError::lookup(format!("document {document_id}")))?;
        let subspace = self
            .check_move(&document, new_parent_id, new_subspace_id)
            .await?;

        self.store
            .move_document(&document_id, new_parent_id, subspace)
            .await?;
        if document.subspace_id != subspace {
            let rehomed = self.rehome_descendants(document_id, subspace).await?;
            debug!(document_id = %document_id, rehomed, "Descendants moved into new subspace");
        }
        self.rederive_from(document_id, new_parent_id, subspace, guard)
            .await
    }

    async fn rederive_from(
        &self,
        document_id: DocumentId,
        new_parent_id: Option<DocumentId>,
        new_subspace_id: Option<SubspaceId>,
        guard: crate::SubtreeGuard,
    ) -> Result<PropagationReport, EngineError> {
        let report = self
            .drive(
                VecDeque::from([Job::Rederive {
                    document: document_id,
                    parent: new_parent_id,
                    subspace: new_subspace_id,
                    depth: 0,
                }]),
                guard,
            )
            .await?;

        info!(
            document_id = %document_id,
            new_parent_id = ?new_parent_id,
            new_subspace_id = ?new_subspace_id,
            nodes = report.nodes,
            deferred = report.deferred,
            "Permissions re-derived after move"
        );
        Ok(report)
    }

    /// Validate a move before anything is written and return the subspace the
    /// document ends up in. Caller holds the workspace lock.
    async fn check_move(
        &self,
        document: &Document,
        new_parent_id: Option<DocumentId>,
        new_subspace_id: Option<SubspaceId>,
    ) -> Result<Option<SubspaceId>, EngineError> {
        let document_id = document.id;
        if let Some(subspace_id) = new_subspace_id {
            let subspace = self
                .store
                .get_subspace(&subspace_id)
                .await
                .map_err(EngineError::lookup(format!("subspace {subspace_id}")))?;
            if subspace.workspace_id != document.workspace_id {
                return Err(EngineError::InvalidArgument(format!(
                    "subspace {subspace_id} is in another workspace"
                )));
            }
        }

        // Walk up from the new parent; meeting the document means a cycle
        let mut parent_subspace = None;
        let mut visited = HashSet::new();
        let mut cursor = new_parent_id;
        while let Some(ancestor_id) = cursor {
            if ancestor_id == document_id {
                return Err(EngineError::InvalidArgument(format!(
                    "document {document_id} cannot move below itself"
                )));
            }
            if !visited.insert(ancestor_id) {
                break;
            }
            let ancestor = self
                .store
                .get_document(&ancestor_id)
                .await
                .map_err(EngineError::lookup(format!("document {ancestor_id}")))?;
            if ancestor.workspace_id != document.workspace_id {
                return Err(EngineError::InvalidArgument(format!(
                    "document {ancestor_id} is in another workspace"
                )));
            }
            if Some(ancestor_id) == new_parent_id {
                parent_subspace = ancestor.subspace_id;
            }
            cursor = ancestor.parent_id;
        }

        if new_parent_id.is_none() {
            return Ok(new_subspace_id);
        }
        match new_subspace_id {
            Some(subspace_id) if Some(subspace_id) != parent_subspace => {
                Err(EngineError::InvalidArgument(format!(
                    "subspace {subspace_id} does not contain the new parent of document {document_id}"
                )))
            }
            _ => Ok(parent_subspace),
        }
    }

    /// Put every descendant of `document_id` into `subspace_id`. Caller holds
    /// the workspace lock and has already checked the tree for cycles.
    async fn rehome_descendants(
        &self,
        document_id: DocumentId,
        subspace_id: Option<SubspaceId>,
    ) -> Result<usize, EngineError> {
        let mut moved = 0;
        let mut visited = HashSet::from([document_id]);
        let mut pending = VecDeque::from([document_id]);
        while let Some(id) = pending.pop_front() {
            for child in self.store.list_child_documents(&id).await? {
                if !visited.insert(child.id) {
                    continue;
                }
                if child.subspace_id != subspace_id {
                    self.store
                        .move_document(&child.id, child.parent_id, subspace_id)
                        .await?;
                    moved += 1;
                }
                pending.push_back(child.id);
            }
        }
        Ok(moved)
    }

    /// Workspace of the rows linked to `origin_grant_id`, if any exist.
    async fn workspace_of_linked(
        &self,
        origin_grant_id: &GrantId,
    ) -> Result<Option<WorkspaceId>, EngineError> {
        let linked = self.store.list_grants_by_source(origin_grant_id).await?;
        match linked.first() {
            Some(row) => Ok(Some(self.workspace_of(&row.resource).await?)),
            None => Ok(None),
        }
    }

    /// Delete the rows propagated directly from `grants`, which the caller has
    /// just deleted under the workspace lock.
    pub(crate) async fn cleanup_children(
        &self,
        grants: &[PermissionGrant],
    ) -> Result<u64, EngineError> {
        let mut removed = 0;
        for grant in grants {
            removed += self.store.delete_grants_by_source(&grant.id).await?;
        }
        Ok(removed)
    }
}
