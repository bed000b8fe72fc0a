//! In-memory store implementation

use super::{GroupStore, PolicyStore};
use crate::error::{StoreError, StoreResult};
use crate::group::{Group, Relation};
use crate::policy::{Policy, PolicyObject};
use crate::roster::{RosterRecord, RosterUpdate};
use crate::types::{Asset, GroupId, PolicyId};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct PolicyTables {
    next_id: PolicyId,
    policies: BTreeMap<PolicyId, Policy>,
    rosters: HashMap<PolicyId, RosterRecord>,
}

impl PolicyTables {
    fn conflicts(&self, policy: &Policy) -> Option<String> {
        self.policies
            .values()
            .filter(|other| other.id != policy.id)
            .find_map(|other| {
                if policy.key.is_some() && other.key == policy.key {
                    Some(format!("policy key '{}'", policy.key.as_deref().unwrap_or_default()))
                } else if policy.object.is_some() && other.object == policy.object {
                    policy.object.as_ref().map(|o| format!("policy object '{}'", o))
                } else {
                    None
                }
            })
    }
}

#[derive(Default)]
struct GroupTables {
    next_id: GroupId,
    groups: BTreeMap<GroupId, Group>,
    relations: HashSet<Relation>,
}

/// Store keeping everything in process memory
///
/// Enforces the same uniqueness constraints a relational backend would
/// (policy key, policy object, group key) and hands out sequential ids.
#[derive(Clone, Default)]
pub struct MemoryStore {
    policies: Arc<RwLock<PolicyTables>>,
    groups: Arc<RwLock<GroupTables>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored policies
    pub async fn policy_count(&self) -> usize {
        self.policies.read().await.policies.len()
    }

    /// Number of stored relations
    pub async fn relation_count(&self) -> usize {
        self.groups.read().await.relations.len()
    }
}

#[async_trait]
impl PolicyStore for MemoryStore {
    async fn create_policy(
        &self,
        mut policy: Policy,
        roster: RosterRecord,
    ) -> StoreResult<(Policy, RosterRecord)> {
        let mut tables = self.policies.write().await;
        if let Some(conflict) = tables.conflicts(&policy) {
            return Err(StoreError::Conflict(conflict));
        }

        tables.next_id += 1;
        policy.id = tables.next_id;
        let roster = RosterRecord {
            policy_id: policy.id,
            ..roster
        };

        tables.policies.insert(policy.id, policy.clone());
        tables.rosters.insert(policy.id, roster.clone());
        Ok((policy, roster))
    }

    async fn update_policy(&self, policy: &Policy, roster: &RosterUpdate) -> StoreResult<()> {
        let mut tables = self.policies.write().await;
        if !tables.policies.contains_key(&policy.id) {
            return Err(StoreError::NotFound(format!("policy {}", policy.id)));
        }
        if let Some(conflict) = tables.conflicts(policy) {
            return Err(StoreError::Conflict(conflict));
        }

        tables.policies.insert(policy.id, policy.clone());
        tables.rosters.insert(
            policy.id,
            RosterRecord {
                policy_id: policy.id,
                ..roster.record.clone()
            },
        );
        Ok(())
    }

    async fn fetch_policy_by_id(&self, id: PolicyId) -> StoreResult<Option<Policy>> {
        Ok(self.policies.read().await.policies.get(&id).cloned())
    }

    async fn fetch_policy_by_key(&self, key: &str) -> StoreResult<Option<Policy>> {
        let tables = self.policies.read().await;
        Ok(tables
            .policies
            .values()
            .find(|p| p.key.as_deref() == Some(key))
            .cloned())
    }

    async fn fetch_policy_by_object(&self, object: &PolicyObject) -> StoreResult<Option<Policy>> {
        let tables = self.policies.read().await;
        Ok(tables
            .policies
            .values()
            .find(|p| p.object.as_ref() == Some(object))
            .cloned())
    }

    async fn delete_policy(&self, id: PolicyId) -> StoreResult<()> {
        let mut tables = self.policies.write().await;
        if tables.policies.remove(&id).is_none() {
            return Err(StoreError::NotFound(format!("policy {}", id)));
        }
        tables.rosters.remove(&id);
        Ok(())
    }

    async fn fetch_roster_by_policy_id(&self, id: PolicyId) -> StoreResult<Option<RosterRecord>> {
        Ok(self.policies.read().await.rosters.get(&id).cloned())
    }
}

#[async_trait]
impl GroupStore for MemoryStore {
    async fn upsert_group(&self, mut group: Group) -> StoreResult<Group> {
        let mut tables = self.groups.write().await;

        let taken = tables
            .groups
            .values()
            .any(|other| other.id != group.id && other.key == group.key);
        if taken {
            return Err(StoreError::Conflict(format!("group key '{}'", group.key)));
        }

        if group.id == 0 {
            tables.next_id += 1;
            group.id = tables.next_id;
        } else if !tables.groups.contains_key(&group.id) {
            return Err(StoreError::NotFound(format!("group {}", group.id)));
        }

        tables.groups.insert(group.id, group.clone());
        Ok(group)
    }

    async fn fetch_group_by_id(&self, id: GroupId) -> StoreResult<Option<Group>> {
        Ok(self.groups.read().await.groups.get(&id).cloned())
    }

    async fn fetch_group_by_key(&self, key: &str) -> StoreResult<Option<Group>> {
        let tables = self.groups.read().await;
        Ok(tables.groups.values().find(|g| g.key == key).cloned())
    }

    async fn fetch_group_by_name(&self, name: &str) -> StoreResult<Option<Group>> {
        let tables = self.groups.read().await;
        Ok(tables.groups.values().find(|g| g.display_name == name).cloned())
    }

    async fn fetch_all_groups(&self) -> StoreResult<Vec<Group>> {
        Ok(self.groups.read().await.groups.values().cloned().collect())
    }

    async fn fetch_child_groups(&self, parent_id: GroupId) -> StoreResult<Vec<Group>> {
        let tables = self.groups.read().await;
        Ok(tables
            .groups
            .values()
            .filter(|g| g.parent_id == parent_id)
            .cloned()
            .collect())
    }

    async fn delete_group_by_id(&self, id: GroupId) -> StoreResult<()> {
        let mut tables = self.groups.write().await;
        if tables.groups.remove(&id).is_none() {
            return Err(StoreError::NotFound(format!("group {}", id)));
        }
        Ok(())
    }

    async fn create_relation(&self, group_id: GroupId, asset: Asset) -> StoreResult<()> {
        let mut tables = self.groups.write().await;
        if !tables.groups.contains_key(&group_id) {
            return Err(StoreError::NotFound(format!("group {}", group_id)));
        }
        tables.relations.insert(Relation { group_id, asset });
        Ok(())
    }

    async fn delete_relation(&self, group_id: GroupId, asset: Asset) -> StoreResult<()> {
        self.groups
            .write()
            .await
            .relations
            .remove(&Relation { group_id, asset });
        Ok(())
    }

    async fn fetch_all_relations(&self) -> StoreResult<Vec<Relation>> {
        Ok(self.groups.read().await.relations.iter().copied().collect())
    }

    async fn has_relation(&self, group_id: GroupId, asset: Asset) -> StoreResult<bool> {
        Ok(self
            .groups
            .read()
            .await
            .relations
            .contains(&Relation { group_id, asset }))
    }
}
