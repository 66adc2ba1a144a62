//! Translation of role-derived levels into document-equivalent access.
//!
//! Only owner/manage style roles carry over to documents. Plain member roles
//! give no document access until an explicit subspace or document grant exists.

use docperm_storage::{Level, ResourceType};

/// Document access implied by a workspace-level grant.
pub fn workspace_to_document(level: Level) -> Level {
    match level {
        Level::Owner | Level::Manage => Level::Owner,
        Level::Edit => Level::Manage,
        Level::Comment | Level::Read | Level::None => Level::None,
    }
}

/// Document access implied by a subspace-level grant.
pub fn subspace_to_document(level: Level) -> Level {
    match level {
        Level::Owner => Level::Owner,
        Level::Manage => Level::Manage,
        Level::Edit => Level::Edit,
        Level::Comment | Level::Read | Level::None => Level::None,
    }
}

/// Translate `level`, found on a `consulted` resource, into access on a `target` resource.
///
/// Only document targets are translated; subspace and workspace targets keep the raw level.
pub fn map_level(target: ResourceType, consulted: ResourceType, level: Level) -> Level {
    match (target, consulted) {
        (ResourceType::Document, ResourceType::Workspace) => workspace_to_document(level),
        (ResourceType::Document, ResourceType::Subspace) => subspace_to_document(level),
        _ => level,
    }
}
