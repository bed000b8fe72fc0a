//! Groups and roles
//!
//! Groups and roles share one hierarchical structure and differ only by
//! kind flag. A parent chain never mixes kinds and never loops.
//!
//! # Example
//!
//! ```rust
//! use cretoai_access::group::{Group, GroupFlags, GroupKind};
//!
//! let eng = Group::new(GroupFlags::GROUP, 0, "eng", "Engineering").unwrap();
//! assert_eq!(eng.kind(), Some(GroupKind::Group));
//! assert!(Group::new(GroupFlags::empty(), 0, "x", "X").is_err());
//! ```

pub mod manager;

pub use manager::GroupManager;

use crate::error::{AccessError, Result};
use crate::types::{Actor, Asset, GroupId};
use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

bitflags! {
    /// Group kind and behaviour flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct GroupFlags: u8 {
        /// Plain group
        const GROUP   = 0b001;
        /// Role
        const ROLE    = 0b010;
        /// New assets are assigned to it by default
        const DEFAULT = 0b100;
    }
}

impl GroupFlags {
    /// Both kinds, for membership queries
    pub const ANY_KIND: Self = Self::GROUP.union(Self::ROLE);
}

/// Kind of a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    Group,
    Role,
}

impl GroupKind {
    /// Flag bit of this kind
    pub fn flag(self) -> GroupFlags {
        match self {
            Self::Group => GroupFlags::GROUP,
            Self::Role => GroupFlags::ROLE,
        }
    }
}

/// Node of the group/role hierarchy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Unique identifier, assigned by the store
    pub id: GroupId,

    /// Parent group, zero at the root
    #[serde(default)]
    pub parent_id: GroupId,

    /// Kind and behaviour flags
    pub flags: GroupFlags,

    /// Unique key
    pub key: String,

    /// Human-readable name
    pub display_name: String,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Last update time
    pub updated_at: DateTime<Utc>,
}

impl Group {
    /// Build and validate a new, not yet persisted group
    pub fn new(
        flags: GroupFlags,
        parent_id: GroupId,
        key: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Result<Self> {
        let now = Utc::now();
        let group = Self {
            id: 0,
            parent_id,
            flags,
            key: key.into(),
            display_name: display_name.into(),
            created_at: now,
            updated_at: now,
        };

        group.validate()?;
        Ok(group)
    }

    /// Check the structural invariants of the group
    pub fn validate(&self) -> Result<()> {
        if self.kind().is_none() {
            return Err(AccessError::InvalidGroup(format!(
                "group '{}' must be exactly one of group or role",
                self.key
            )));
        }

        if self.key.is_empty() {
            return Err(AccessError::InvalidGroup("group key cannot be empty".to_string()));
        }

        if self.display_name.is_empty() {
            return Err(AccessError::InvalidGroup(format!(
                "group '{}' has an empty display name",
                self.key
            )));
        }

        if self.id != 0 && self.parent_id == self.id {
            return Err(AccessError::CircularGroup(self.id));
        }

        Ok(())
    }

    /// Kind, `None` when the flags name no kind or both
    pub fn kind(&self) -> Option<GroupKind> {
        let kind = self.flags & GroupFlags::ANY_KIND;
        if kind == GroupFlags::GROUP {
            Some(GroupKind::Group)
        } else if kind == GroupFlags::ROLE {
            Some(GroupKind::Role)
        } else {
            None
        }
    }

    /// Whether the group is a role
    pub fn is_role(&self) -> bool {
        self.kind() == Some(GroupKind::Role)
    }

    /// Whether new assets join it by default
    pub fn is_default(&self) -> bool {
        self.flags.contains(GroupFlags::DEFAULT)
    }

    /// Actor under which the group holds roster cells
    pub fn actor(&self) -> Actor {
        if self.is_role() {
            Actor::role(self.id)
        } else {
            Actor::group(self.id)
        }
    }
}

/// Membership of an asset in a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relation {
    pub group_id: GroupId,
    pub asset: Asset,
}
