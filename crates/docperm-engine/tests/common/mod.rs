//! Shared fixture for engine integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use docperm_engine::{EngineConfig, PermissionEngine};
use docperm_storage::{
    CreateDocumentParams, CreateGroupParams, CreateSubspaceParams, CreateWorkspaceParams,
    DocumentId, GrantStore, GroupId, Level, PermissionGrant, Principal, ResourceRef, SourceType,
    SubspaceId, SubspaceType, UserId, WorkspaceId,
};
use docperm_store_memory::MemoryGrantStore;

/// A workspace with one invite-only subspace, backed by the in-memory store.
pub struct Fixture {
    pub store: Arc<MemoryGrantStore>,
    pub engine: PermissionEngine<MemoryGrantStore>,
    pub workspace_id: WorkspaceId,
    pub subspace_id: SubspaceId,
    pub creator: UserId,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_config(EngineConfig::default()).await
    }

    pub async fn with_config(config: EngineConfig) -> Self {
        let store = Arc::new(MemoryGrantStore::new());
        let workspace_id = store
            .create_workspace(&CreateWorkspaceParams {
                id: WorkspaceId::new(),
                name: "acme".to_string(),
            })
            .await
            .unwrap();
        let creator = UserId::new();
        let engine = PermissionEngine::with_config(store.clone(), config);
        let mut fixture = Self {
            store,
            engine,
            workspace_id,
            subspace_id: SubspaceId::new(),
            creator,
        };
        fixture.subspace_id = fixture.subspace(SubspaceType::InviteOnly).await;
        fixture
    }

    pub async fn subspace(&self, subspace_type: SubspaceType) -> SubspaceId {
        self.store
            .create_subspace(&CreateSubspaceParams {
                id: SubspaceId::new(),
                workspace_id: self.workspace_id,
                name: format!("{subspace_type:?}"),
                subspace_type,
                created_by_id: self.creator,
            })
            .await
            .unwrap()
    }

    pub async fn document(
        &self,
        subspace_id: Option<SubspaceId>,
        parent_id: Option<DocumentId>,
    ) -> DocumentId {
        self.store
            .create_document(&CreateDocumentParams {
                id: DocumentId::new(),
                workspace_id: self.workspace_id,
                subspace_id,
                parent_id,
                title: "doc".to_string(),
            })
            .await
            .unwrap()
    }

    /// A root document in the fixture subspace with `len - 1` nested descendants.
    pub async fn chain(&self, len: usize) -> Vec<DocumentId> {
        let mut docs = Vec::with_capacity(len);
        let mut parent = None;
        for _ in 0..len {
            let doc = self.document(Some(self.subspace_id), parent).await;
            docs.push(doc);
            parent = Some(doc);
        }
        docs
    }

    pub async fn group(&self, members: &[UserId]) -> GroupId {
        let group_id = self
            .store
            .create_group(&CreateGroupParams {
                id: GroupId::new(),
                workspace_id: self.workspace_id,
                name: format!("group-{}", GroupId::new()),
            })
            .await
            .unwrap();
        for user_id in members {
            self.store.add_group_member(&group_id, user_id).await.unwrap();
        }
        group_id
    }

    pub async fn level(&self, user_id: UserId, document_id: DocumentId) -> Level {
        self.engine
            .resolve_user_permission(user_id, &ResourceRef::Document(document_id))
            .await
            .unwrap()
    }

    pub async fn rows(&self, resource: ResourceRef) -> Vec<PermissionGrant> {
        self.store.list_resource_grants(&resource).await.unwrap()
    }

    /// The row for `(principal, resource, source_type)`, if any.
    pub async fn row(
        &self,
        principal: Principal,
        resource: ResourceRef,
        source_type: SourceType,
    ) -> Option<PermissionGrant> {
        self.rows(resource)
            .await
            .into_iter()
            .find(|g| g.principal == principal && g.source_type == source_type)
    }
}
