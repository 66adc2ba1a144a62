//! docperm-engine - permission resolution and propagation
//!
//! The engine answers "what can this principal do here?" over a
//! workspace → subspace → document tree, and keeps the denormalized table of
//! inherited grants consistent as memberships, roles and the tree change.
//!
//! # Architecture
//!
//! - Reads go through the resolver: no locks, read-your-writes against the store.
//! - Writes take the lock of the workspace they touch, persist the root grant(s)
//!   and drain a fan-out worklist. Work beyond the inline budget continues in a
//!   background task that keeps holding the lock; callers see `deferred = true`.
//! - Every grant write is an upsert keyed by `(principal, resource, source_type)`,
//!   so retries after a failure converge instead of duplicating rows.

use std::collections::VecDeque;
use std::sync::Arc;

use docperm_storage::{
    GrantStore, GuestId, Level, PermissionGrant, ResourceRef, UserId, WorkspaceId,
};
use tracing::{error, info};

mod assignments;
mod config;
mod error;
mod groups;
mod guests;
pub mod level_map;
mod locks;
pub mod priority;
mod propagator;
mod resolver;
mod roles;
mod sweeper;

pub use config::{ConfigError, EngineConfig};
pub use error::EngineError;
pub use guests::{GuestInvite, SweepReport};
pub use locks::{SubtreeGuard, SubtreeLocks};
pub use priority::{priority_of, priority_of_name, LOWEST_PRIORITY};
pub use sweeper::GuestSweeper;

use propagator::{Job, Propagator};

/// Outcome of the fan-out part of a mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropagationReport {
    /// Resources whose inherited rows were rewritten inside the call
    pub nodes: usize,
    /// Inherited rows upserted inside the call
    pub upserted: usize,
    /// Fan-out stopped at the depth cap somewhere in the tree
    pub truncated: bool,
    /// The rest of the fan-out continues in a background task
    pub deferred: bool,
}

/// Root grants written by a mutation plus what happened below them.
///
/// Returned so the calling layer can build notification payloads.
#[derive(Debug, Clone, Default)]
pub struct GrantOutcome {
    pub grants: Vec<PermissionGrant>,
    pub removed: Vec<PermissionGrant>,
    pub propagation: PropagationReport,
}

/// A direct assignment. Exactly one of `user_id` / `guest_id` must be set.
#[derive(Debug, Clone)]
pub struct AssignPermission {
    pub user_id: Option<UserId>,
    pub guest_id: Option<GuestId>,
    pub resource: ResourceRef,
    pub level: Level,
    pub created_by_id: Option<UserId>,
}

/// The permission engine.
pub struct PermissionEngine<S> {
    store: Arc<S>,
    locks: Arc<SubtreeLocks>,
    config: EngineConfig,
}

impl<S> Clone for PermissionEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            locks: self.locks.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: GrantStore + 'static> PermissionEngine<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    pub fn with_config(store: Arc<S>, config: EngineConfig) -> Self {
        Self {
            store,
            locks: Arc::new(SubtreeLocks::new()),
            config,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// All grant rows on a resource, for permission-management screens.
    pub async fn list_resource_permissions(
        &self,
        resource: &ResourceRef,
    ) -> Result<Vec<PermissionGrant>, EngineError> {
        self.workspace_of(resource).await?;
        Ok(self.store.list_resource_grants(resource).await?)
    }

    /// Wait until no mutation (including deferred fan-out) holds the workspace.
    pub async fn wait_idle(&self, workspace_id: WorkspaceId) -> Result<(), EngineError> {
        let _guard = self.lock(workspace_id).await?;
        Ok(())
    }

    /// Whether a mutation (or deferred fan-out) currently holds the workspace.
    pub fn is_busy(&self, workspace_id: &WorkspaceId) -> bool {
        self.locks.is_locked(workspace_id)
    }

    /// Take the workspace write lock directly. Engine mutations on the
    /// workspace wait (and eventually fail with `Conflict`) while it is held.
    pub async fn lock_workspace(&self, workspace_id: WorkspaceId) -> Result<SubtreeGuard, EngineError> {
        self.lock(workspace_id).await
    }

    // ───────────────────────────── Internals ─────────────────────────────

    pub(crate) async fn lock(&self, workspace_id: WorkspaceId) -> Result<SubtreeGuard, EngineError> {
        self.locks
            .acquire(workspace_id, self.config.lock_timeout)
            .await
    }

    /// Workspace containing `resource`; `NotFound` when any part is missing.
    pub(crate) async fn workspace_of(&self, resource: &ResourceRef) -> Result<WorkspaceId, EngineError> {
        match resource {
            ResourceRef::Workspace(id) => {
                self.store
                    .get_workspace(id)
                    .await
                    .map_err(EngineError::lookup(format!("workspace {id}")))?;
                Ok(*id)
            }
            ResourceRef::Subspace(id) => Ok(self
                .store
                .get_subspace(id)
                .await
                .map_err(EngineError::lookup(format!("subspace {id}")))?
                .workspace_id),
            ResourceRef::Document(id) => Ok(self
                .store
                .get_document(id)
                .await
                .map_err(EngineError::lookup(format!("document {id}")))?
                .workspace_id),
        }
    }

    pub(crate) fn propagator(&self) -> Propagator<S> {
        Propagator::new(self.store.clone(), self.config.max_depth)
    }

    /// Drain `queue` up to the inline budget, deferring the rest with the lock still held.
    pub(crate) async fn drive(
        &self,
        mut queue: VecDeque<Job>,
        guard: SubtreeGuard,
    ) -> Result<PropagationReport, EngineError> {
        let propagator = self.propagator();
        let mut report = PropagationReport::default();
        propagator
            .run(&mut queue, Some(self.config.inline_budget), &mut report)
            .await?;

        if queue.is_empty() {
            return Ok(report);
        }

        report.deferred = true;
        info!(pending = queue.len(), "Deferring remaining fan-out to background task");
        tokio::spawn(async move {
            let _guard = guard;
            let mut background = PropagationReport::default();
            match propagator.run(&mut queue, None, &mut background).await {
                Ok(()) => info!(
                    nodes = background.nodes,
                    upserted = background.upserted,
                    truncated = background.truncated,
                    "Background fan-out finished"
                ),
                Err(e) => error!(error = %e, "Background fan-out failed"),
            }
        });
        Ok(report)
    }
}
