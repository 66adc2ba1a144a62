//! Document types.

use chrono::{DateTime, Utc};

use super::{DocumentId, ResourceRef, SubspaceId, WorkspaceId};

/// Document record. Documents nest under a parent document or sit at a subspace root.
#[derive(Clone, Debug)]
pub struct Document {
    pub id: DocumentId,
    pub workspace_id: WorkspaceId,
    pub subspace_id: Option<SubspaceId>,
    pub parent_id: Option<DocumentId>,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

impl Document {
    /// Resources consulted when resolving access, most specific first.
    pub fn ancestry(&self) -> Vec<ResourceRef> {
        let mut levels = vec![ResourceRef::Document(self.id)];
        if let Some(subspace_id) = self.subspace_id {
            levels.push(ResourceRef::Subspace(subspace_id));
        }
        levels.push(ResourceRef::Workspace(self.workspace_id));
        levels
    }
}

/// Parameters for creating a document
#[derive(Clone, Debug)]
pub struct CreateDocumentParams {
    pub id: DocumentId,
    pub workspace_id: WorkspaceId,
    pub subspace_id: Option<SubspaceId>,
    pub parent_id: Option<DocumentId>,
    pub title: String,
}
