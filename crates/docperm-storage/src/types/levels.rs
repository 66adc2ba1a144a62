//! Access levels, grant source kinds and resource addressing.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{DocumentId, SubspaceId, WorkspaceId};

/// Error type for parsing one of the storage enums from its string form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

impl std::fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for ParseEnumError {}

/// Access level, ordered from no access to full ownership.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Level {
    None,
    Read,
    Comment,
    Edit,
    Manage,
    Owner,
}

impl Level {
    pub const ALL: [Level; 6] = [
        Level::None,
        Level::Read,
        Level::Comment,
        Level::Edit,
        Level::Manage,
        Level::Owner,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::None => "NONE",
            Level::Read => "READ",
            Level::Comment => "COMMENT",
            Level::Edit => "EDIT",
            Level::Manage => "MANAGE",
            Level::Owner => "OWNER",
        }
    }

    /// Check if this level grants at least the access of another level
    pub fn includes(&self, other: &Level) -> bool {
        self >= other
    }
}

impl FromStr for Level {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NONE" => Ok(Level::None),
            "READ" => Ok(Level::Read),
            "COMMENT" => Ok(Level::Comment),
            "EDIT" => Ok(Level::Edit),
            "MANAGE" => Ok(Level::Manage),
            "OWNER" => Ok(Level::Owner),
            _ => Err(ParseEnumError::new("level", s)),
        }
    }
}

/// Where a grant came from. Each kind has a fixed priority rank.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceType {
    Direct,
    Group,
    SubspaceAdmin,
    SubspaceMember,
    WorkspaceAdmin,
    WorkspaceMember,
    Guest,
}

impl SourceType {
    pub const ALL: [SourceType; 7] = [
        SourceType::Direct,
        SourceType::Group,
        SourceType::SubspaceAdmin,
        SourceType::SubspaceMember,
        SourceType::WorkspaceAdmin,
        SourceType::WorkspaceMember,
        SourceType::Guest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Direct => "DIRECT",
            SourceType::Group => "GROUP",
            SourceType::SubspaceAdmin => "SUBSPACE_ADMIN",
            SourceType::SubspaceMember => "SUBSPACE_MEMBER",
            SourceType::WorkspaceAdmin => "WORKSPACE_ADMIN",
            SourceType::WorkspaceMember => "WORKSPACE_MEMBER",
            SourceType::Guest => "GUEST",
        }
    }
}

impl FromStr for SourceType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceType::ALL
            .into_iter()
            .find(|source| source.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("source type", s))
    }
}

/// Kind of node in the workspace -> subspace -> document hierarchy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
    Workspace,
    Subspace,
    Document,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Workspace => "WORKSPACE",
            ResourceType::Subspace => "SUBSPACE",
            ResourceType::Document => "DOCUMENT",
        }
    }
}

impl FromStr for ResourceType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WORKSPACE" => Ok(ResourceType::Workspace),
            "SUBSPACE" => Ok(ResourceType::Subspace),
            "DOCUMENT" => Ok(ResourceType::Document),
            _ => Err(ParseEnumError::new("resource type", s)),
        }
    }
}

/// A typed pointer at one node of the hierarchy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceRef {
    Workspace(WorkspaceId),
    Subspace(SubspaceId),
    Document(DocumentId),
}

impl ResourceRef {
    pub fn resource_type(&self) -> ResourceType {
        match self {
            ResourceRef::Workspace(_) => ResourceType::Workspace,
            ResourceRef::Subspace(_) => ResourceType::Subspace,
            ResourceRef::Document(_) => ResourceType::Document,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            ResourceRef::Workspace(id) => id.0,
            ResourceRef::Subspace(id) => id.0,
            ResourceRef::Document(id) => id.0,
        }
    }

    /// Rebuild a reference from its stored `(resource_type, resource_id)` columns.
    pub fn from_parts(resource_type: ResourceType, id: Uuid) -> Self {
        match resource_type {
            ResourceType::Workspace => ResourceRef::Workspace(WorkspaceId(id)),
            ResourceType::Subspace => ResourceRef::Subspace(SubspaceId(id)),
            ResourceType::Document => ResourceRef::Document(DocumentId(id)),
        }
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.resource_type().as_str(), self.id())
    }
}
