//! Policy definition
//!
//! A policy describes one protected object. It is identified by a key,
//! by an object designator (name + id), or both, and may hang below a
//! parent policy whose rights it inherits or extends.

use crate::error::{AccessError, Result};
use crate::types::{PolicyId, UserId};
use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

bitflags! {
    /// Policy inheritance flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct PolicyFlags: u8 {
        /// Defer entirely to the parent, own roster is ignored
        const INHERIT = 0b01;
        /// Combine parent rights with the own roster
        const EXTEND  = 0b10;
    }
}

/// Object designator of a policy
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyObject {
    /// Object type name (e.g. "document")
    pub name: String,

    /// Object identifier within its type
    pub id: u64,
}

impl PolicyObject {
    /// Create a new object designator
    pub fn new(name: impl Into<String>, id: u64) -> Self {
        Self {
            name: name.into(),
            id,
        }
    }
}

impl fmt::Display for PolicyObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.id)
    }
}

/// Protected-object descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Unique policy identifier, assigned by the store
    pub id: PolicyId,

    /// Parent policy, zero when detached
    #[serde(default)]
    pub parent_id: PolicyId,

    /// Owner, always holds full access
    pub owner_id: UserId,

    /// Optional unique key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Optional unique object designator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<PolicyObject>,

    /// Inheritance flags
    #[serde(default)]
    pub flags: PolicyFlags,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Last update time
    pub updated_at: DateTime<Utc>,
}

impl Policy {
    /// Build and validate a new, not yet persisted policy
    pub fn new(
        key: Option<String>,
        owner_id: UserId,
        parent_id: PolicyId,
        object: Option<PolicyObject>,
        flags: PolicyFlags,
    ) -> Result<Self> {
        let now = Utc::now();
        let policy = Self {
            id: 0,
            parent_id,
            owner_id,
            key: key.filter(|k| !k.is_empty()),
            object,
            flags,
            created_at: now,
            updated_at: now,
        };

        policy.validate()?;
        Ok(policy)
    }

    /// Check the structural invariants of the policy
    pub fn validate(&self) -> Result<()> {
        if self.flags.contains(PolicyFlags::INHERIT | PolicyFlags::EXTEND) {
            return Err(AccessError::InvalidPolicyFlags(
                "inherit and extend are mutually exclusive".to_string(),
            ));
        }

        if !self.flags.is_empty() && self.parent_id == 0 {
            return Err(AccessError::ParentRequired);
        }

        if self.parent_id != 0 && self.parent_id == self.id {
            return Err(AccessError::CircularParent(self.id));
        }

        if let Some(object) = &self.object {
            if object.name.is_empty() || object.id == 0 {
                return Err(AccessError::InvalidInput(format!(
                    "policy object requires a name and a non-zero id, got '{}'",
                    object
                )));
            }
        }

        if self.key.as_deref().map_or(true, str::is_empty) && self.object.is_none() {
            return Err(AccessError::EmptyDesignators);
        }

        Ok(())
    }

    /// Rights come from the parent only
    pub fn is_inherited(&self) -> bool {
        self.flags.contains(PolicyFlags::INHERIT)
    }

    /// Rights combine the parent and the own roster
    pub fn is_extended(&self) -> bool {
        self.flags.contains(PolicyFlags::EXTEND)
    }

    /// Whether the user owns this policy
    pub fn is_owner(&self, user_id: UserId) -> bool {
        self.owner_id != 0 && self.owner_id == user_id
    }

    /// Short designation for logs and errors
    pub fn designation(&self) -> String {
        match (&self.key, &self.object) {
            (Some(key), _) => format!("{} ({})", self.id, key),
            (None, Some(object)) => format!("{} ({})", self.id, object),
            (None, None) => self.id.to_string(),
        }
    }
}
