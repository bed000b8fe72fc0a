//! Core identity types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique policy identifier, zero means unset
pub type PolicyId = u64;

/// Unique group identifier, zero means unset
pub type GroupId = u64;

/// Unique user identifier
pub type UserId = u64;

/// Kind of actor requesting or receiving rights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    /// Public access, the id is always zero
    Everyone,
    /// A single user
    User,
    /// A group of the role kind
    RoleGroup,
    /// A group of the plain group kind
    Group,
}

impl fmt::Display for ActorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Everyone => "everyone",
            Self::User => "user",
            Self::RoleGroup => "role",
            Self::Group => "group",
        };
        f.write_str(name)
    }
}

/// Actor identity (who is checked or granted rights)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Actor {
    /// Actor kind
    pub kind: ActorKind,

    /// Actor identifier, ignored for `Everyone`
    pub id: u64,
}

impl Actor {
    /// Create an actor; the id is dropped for `Everyone`
    pub fn new(kind: ActorKind, id: u64) -> Self {
        match kind {
            ActorKind::Everyone => Self::everyone(),
            _ => Self { kind, id },
        }
    }

    /// Public actor
    pub const fn everyone() -> Self {
        Self {
            kind: ActorKind::Everyone,
            id: 0,
        }
    }

    /// User actor
    pub const fn user(id: UserId) -> Self {
        Self {
            kind: ActorKind::User,
            id,
        }
    }

    /// Role-group actor
    pub const fn role(id: GroupId) -> Self {
        Self {
            kind: ActorKind::RoleGroup,
            id,
        }
    }

    /// Plain group actor
    pub const fn group(id: GroupId) -> Self {
        Self {
            kind: ActorKind::Group,
            id,
        }
    }

    /// Whether this is the public actor
    pub fn is_everyone(&self) -> bool {
        self.kind == ActorKind::Everyone
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ActorKind::Everyone => write!(f, "everyone"),
            kind => write!(f, "{}:{}", kind, self.id),
        }
    }
}

/// Member side of a group relation (typically a user)
pub type Asset = Actor;
