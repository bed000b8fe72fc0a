//! Error types for the rights engine

use crate::types::{GroupId, PolicyId};
use thiserror::Error;

/// Errors reported by a storage backend
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Record does not exist
    #[error("record not found: {0}")]
    NotFound(String),

    /// Unique constraint violated
    #[error("conflict: {0}")]
    Conflict(String),

    /// Any other backend failure
    #[error("backend failure: {0}")]
    Backend(String),
}

/// Result type for storage operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Rights engine errors
#[derive(Debug, Error)]
pub enum AccessError {
    /// Policy ID is zero where a real policy is required
    #[error("policy id is zero")]
    ZeroPolicyId,

    /// Policy does not exist
    #[error("policy not found: {0}")]
    PolicyNotFound(String),

    /// Another policy already uses this key
    #[error("policy key is already taken: {0}")]
    PolicyKeyTaken(String),

    /// Another policy already protects this object
    #[error("policy object conflict: {0}")]
    PolicyObjectConflict(String),

    /// Identity field cannot be changed after creation
    #[error("forbidden change of field: {0}")]
    ForbiddenChange(&'static str),

    /// Policy has neither a key nor an object
    #[error("access policy has no key or object designators")]
    EmptyDesignators,

    /// Inherit and extend flags set together
    #[error("invalid policy flags: {0}")]
    InvalidPolicyFlags(String),

    /// Inherit or extend flag set without a parent
    #[error("policy flags require a parent policy")]
    ParentRequired,

    /// Parent link would close a loop
    #[error("policy parent chain is circular at policy {0}")]
    CircularParent(PolicyId),

    /// Grantor tried to delegate rights it does not hold
    #[error("excess of rights: grantor lacks {0}")]
    ExcessOfRights(String),

    /// Actor does not hold the requested rights
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// No roster exists for the policy
    #[error("roster is missing for policy {0}")]
    NilRoster(PolicyId),

    /// Roster record does not belong to the requested policy
    #[error("roster is empty or mismatched for policy {0}")]
    EmptyRoster(PolicyId),

    /// Group does not exist
    #[error("group not found: {0}")]
    GroupNotFound(String),

    /// Another group already uses this key
    #[error("group key is already taken: {0}")]
    GroupKeyTaken(String),

    /// Group and parent are of different kinds
    #[error("group kind mismatch: {0}")]
    GroupKindMismatch(String),

    /// Group parent chain contains a loop
    #[error("group parent chain is circular at group {0}")]
    CircularGroup(GroupId),

    /// Group still has child groups
    #[error("group {0} still has child groups")]
    GroupHasChildren(GroupId),

    /// Invalid group definition
    #[error("invalid group: {0}")]
    InvalidGroup(String),

    /// Asset already related to the group
    #[error("asset is already a member of group {0}")]
    AlreadyMember(GroupId),

    /// Asset is not related to the group
    #[error("asset is not a member of group {0}")]
    NotMember(GroupId),

    /// Asset cannot take part in a membership
    #[error("invalid asset: {0}")]
    InvalidAsset(String),

    /// Invalid input
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration could not be parsed
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend error with the entity it concerned
    #[error("store error ({context}): {source}")]
    Store {
        context: String,
        #[source]
        source: StoreError,
    },
}

impl AccessError {
    /// Wrap a backend error with entity context
    pub fn store(context: impl Into<String>, source: StoreError) -> Self {
        Self::Store {
            context: context.into(),
            source,
        }
    }

    /// Absence of a policy, group or membership
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::PolicyNotFound(_) | Self::GroupNotFound(_) | Self::NotMember(_)
        )
    }

    /// Uniqueness or membership conflicts
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::PolicyKeyTaken(_)
                | Self::PolicyObjectConflict(_)
                | Self::GroupKeyTaken(_)
                | Self::AlreadyMember(_)
        )
    }

    /// Failed authorization, never to be mistaken for absence
    pub fn is_authorization(&self) -> bool {
        matches!(self, Self::ExcessOfRights(_) | Self::AccessDenied(_))
    }
}

/// Result type for rights engine operations
pub type Result<T> = std::result::Result<T, AccessError>;
