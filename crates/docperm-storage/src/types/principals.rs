//! Principal types: the identity a grant is issued to.

use serde::{Deserialize, Serialize};

use super::{GuestId, UserId};

/// A user or a time-limited guest. Exactly one identity is always set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Principal {
    User(UserId),
    Guest(GuestId),
}

/// Error returned when loose principal parts do not name exactly one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidPrincipal {
    Neither,
    Both,
}

impl std::fmt::Display for InvalidPrincipal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidPrincipal::Neither => write!(f, "principal needs a user id or a guest id"),
            InvalidPrincipal::Both => {
                write!(f, "principal cannot have both a user id and a guest id")
            }
        }
    }
}

impl std::error::Error for InvalidPrincipal {}

impl Principal {
    /// Build a principal from the nullable `(user_id, guest_id)` column pair.
    pub fn from_parts(
        user_id: Option<UserId>,
        guest_id: Option<GuestId>,
    ) -> Result<Self, InvalidPrincipal> {
        match (user_id, guest_id) {
            (Some(user), None) => Ok(Principal::User(user)),
            (None, Some(guest)) => Ok(Principal::Guest(guest)),
            (None, None) => Err(InvalidPrincipal::Neither),
            (Some(_), Some(_)) => Err(InvalidPrincipal::Both),
        }
    }

    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Principal::User(id) => Some(*id),
            Principal::Guest(_) => None,
        }
    }

    pub fn guest_id(&self) -> Option<GuestId> {
        match self {
            Principal::User(_) => None,
            Principal::Guest(id) => Some(*id),
        }
    }

    /// Stable single-column key (`user:<uuid>` / `guest:<uuid>`), used for uniqueness.
    pub fn key(&self) -> String {
        match self {
            Principal::User(id) => format!("user:{}", id.0),
            Principal::Guest(id) => format!("guest:{}", id.0),
        }
    }
}

impl From<UserId> for Principal {
    fn from(id: UserId) -> Self {
        Principal::User(id)
    }
}

impl From<GuestId> for Principal {
    fn from(id: GuestId) -> Self {
        Principal::Guest(id)
    }
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}
