//! Persistence boundary
//!
//! The managers never talk to a database directly; they are handed a
//! store implementing these traits. Every call is a single awaited
//! operation, failures are reported as [`StoreError`] and never retried
//! here.

pub mod memory;

pub use memory::MemoryStore;

use crate::error::StoreResult;
use crate::group::{Group, Relation};
use crate::policy::{Policy, PolicyObject};
use crate::roster::{RosterRecord, RosterUpdate};
use crate::types::{Asset, GroupId, PolicyId};
use async_trait::async_trait;

/// Policy and roster persistence
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Insert a new policy with its initial roster, assigning the id
    async fn create_policy(
        &self,
        policy: Policy,
        roster: RosterRecord,
    ) -> StoreResult<(Policy, RosterRecord)>;

    /// Persist policy fields and roster changes in one operation
    async fn update_policy(&self, policy: &Policy, roster: &RosterUpdate) -> StoreResult<()>;

    /// Get a policy by ID
    async fn fetch_policy_by_id(&self, id: PolicyId) -> StoreResult<Option<Policy>>;

    /// Get a policy by key
    async fn fetch_policy_by_key(&self, key: &str) -> StoreResult<Option<Policy>>;

    /// Get a policy by object designator
    async fn fetch_policy_by_object(&self, object: &PolicyObject) -> StoreResult<Option<Policy>>;

    /// Delete a policy and its roster
    async fn delete_policy(&self, id: PolicyId) -> StoreResult<()>;

    /// Get the roster of a policy
    async fn fetch_roster_by_policy_id(&self, id: PolicyId) -> StoreResult<Option<RosterRecord>>;
}

/// Group and membership persistence
#[async_trait]
pub trait GroupStore: Send + Sync {
    /// Insert or update a group, assigning the id of a new one
    async fn upsert_group(&self, group: Group) -> StoreResult<Group>;

    /// Get a group by ID
    async fn fetch_group_by_id(&self, id: GroupId) -> StoreResult<Option<Group>>;

    /// Get a group by key
    async fn fetch_group_by_key(&self, key: &str) -> StoreResult<Option<Group>>;

    /// Get a group by display name
    async fn fetch_group_by_name(&self, name: &str) -> StoreResult<Option<Group>>;

    /// List all groups
    async fn fetch_all_groups(&self) -> StoreResult<Vec<Group>>;

    /// List the direct children of a group
    async fn fetch_child_groups(&self, parent_id: GroupId) -> StoreResult<Vec<Group>>;

    /// Delete a group
    async fn delete_group_by_id(&self, id: GroupId) -> StoreResult<()>;

    /// Relate an asset to a group, idempotent
    async fn create_relation(&self, group_id: GroupId, asset: Asset) -> StoreResult<()>;

    /// Remove a relation
    async fn delete_relation(&self, group_id: GroupId, asset: Asset) -> StoreResult<()>;

    /// List all relations
    async fn fetch_all_relations(&self) -> StoreResult<Vec<Relation>>;

    /// Whether a relation exists
    async fn has_relation(&self, group_id: GroupId, asset: Asset) -> StoreResult<bool>;
}
