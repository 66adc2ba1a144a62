//! Type definitions for docperm storage.

mod documents;
mod groups;
mod guests;
mod ids;
mod levels;
mod permissions;
mod principals;
mod roles;
mod subspaces;
mod workspaces;

// Re-export all types from submodules
pub use documents::*;
pub use groups::*;
pub use guests::*;
pub use ids::*;
pub use levels::*;
pub use permissions::*;
pub use principals::*;
pub use roles::*;
pub use subspaces::*;
pub use workspaces::*;
