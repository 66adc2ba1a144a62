//! Membership roles, subspace visibility types and guest lifecycle status.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ParseEnumError;

/// Role within a workspace
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceRole {
    Owner,  // Created the workspace, full control
    Admin,  // Manages members and every subspace
    Member, // Access driven by subspace membership and grants
}

impl FromStr for WorkspaceRole {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(WorkspaceRole::Owner),
            "admin" => Ok(WorkspaceRole::Admin),
            "member" => Ok(WorkspaceRole::Member),
            _ => Err(ParseEnumError::new("workspace role", s)),
        }
    }
}

impl WorkspaceRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkspaceRole::Owner => "owner",
            WorkspaceRole::Admin => "admin",
            WorkspaceRole::Member => "member",
        }
    }

    /// Check if this role has at least the permissions of another role
    pub fn includes(&self, other: &WorkspaceRole) -> bool {
        match self {
            WorkspaceRole::Owner => true,
            WorkspaceRole::Admin => matches!(other, WorkspaceRole::Admin | WorkspaceRole::Member),
            WorkspaceRole::Member => matches!(other, WorkspaceRole::Member),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.includes(&WorkspaceRole::Admin)
    }
}

/// Role within a subspace
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubspaceRole {
    Admin,
    Member,
}

impl FromStr for SubspaceRole {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(SubspaceRole::Admin),
            "member" => Ok(SubspaceRole::Member),
            _ => Err(ParseEnumError::new("subspace role", s)),
        }
    }
}

impl SubspaceRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubspaceRole::Admin => "admin",
            SubspaceRole::Member => "member",
        }
    }
}

/// Visibility type of a subspace; decides which role grants it carries
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubspaceType {
    WorkspaceWide, // Every workspace member gets a role-derived grant
    Public,        // Creator admin, everyone else may comment
    InviteOnly,    // Creator admin, others only by invitation
    Private,       // Creator admin only
}

impl FromStr for SubspaceType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WORKSPACE_WIDE" => Ok(SubspaceType::WorkspaceWide),
            "PUBLIC" => Ok(SubspaceType::Public),
            "INVITE_ONLY" => Ok(SubspaceType::InviteOnly),
            "PRIVATE" => Ok(SubspaceType::Private),
            _ => Err(ParseEnumError::new("subspace type", s)),
        }
    }
}

impl SubspaceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubspaceType::WorkspaceWide => "WORKSPACE_WIDE",
            SubspaceType::Public => "PUBLIC",
            SubspaceType::InviteOnly => "INVITE_ONLY",
            SubspaceType::Private => "PRIVATE",
        }
    }
}

/// Guest record status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GuestStatus {
    Pending,
    Active,
    Expired,
    Revoked,
}

impl FromStr for GuestStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(GuestStatus::Pending),
            "ACTIVE" => Ok(GuestStatus::Active),
            "EXPIRED" => Ok(GuestStatus::Expired),
            "REVOKED" => Ok(GuestStatus::Revoked),
            _ => Err(ParseEnumError::new("guest status", s)),
        }
    }
}

impl GuestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuestStatus::Pending => "PENDING",
            GuestStatus::Active => "ACTIVE",
            GuestStatus::Expired => "EXPIRED",
            GuestStatus::Revoked => "REVOKED",
        }
    }
}
