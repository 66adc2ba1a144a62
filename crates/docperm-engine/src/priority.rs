//! Priority of grant sources. Lower rank wins.

use docperm_storage::SourceType;

/// Rank given to anything the table does not know.
pub const LOWEST_PRIORITY: u8 = 7;

/// The single authoritative ranking of grant sources (1 = highest).
pub fn priority_of(source_type: SourceType) -> u8 {
    match source_type {
        SourceType::Direct => 1,
        SourceType::Group => 2,
        SourceType::SubspaceAdmin => 3,
        SourceType::SubspaceMember => 4,
        SourceType::WorkspaceAdmin => 5,
        SourceType::WorkspaceMember => 6,
        SourceType::Guest => LOWEST_PRIORITY,
    }
}

/// Rank of a source kind given by name. Unknown names fail toward least privilege.
pub fn priority_of_name(name: &str) -> u8 {
    name.parse::<SourceType>()
        .map(priority_of)
        .unwrap_or(LOWEST_PRIORITY)
}
