//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use cretoai_access::{
    AccessManager, Asset, Group, GroupId, GroupManager, GroupStore, ManagerConfig, MemoryStore,
    Policy, PolicyId, PolicyObject, PolicyStore, Relation, RosterRecord, RosterUpdate, StoreError,
    StoreResult,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const OWNER: u64 = 1;

/// Managers sharing one in-memory store
pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub groups: Arc<GroupManager>,
    pub access: AccessManager,
}

pub async fn fixture() -> Fixture {
    fixture_with(ManagerConfig::default()).await
}

pub async fn fixture_with(config: ManagerConfig) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let groups = Arc::new(GroupManager::open(store.clone()).await.unwrap());
    let access = AccessManager::new(store.clone(), groups.clone(), config);
    Fixture {
        store,
        groups,
        access,
    }
}

/// Policy store whose updates can be switched to fail
#[derive(Clone, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_updates: Arc<AtomicBool>,
}

impl FlakyStore {
    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PolicyStore for FlakyStore {
    async fn create_policy(
        &self,
        policy: Policy,
        roster: RosterRecord,
    ) -> StoreResult<(Policy, RosterRecord)> {
        self.inner.create_policy(policy, roster).await
    }

    async fn update_policy(&self, policy: &Policy, roster: &RosterUpdate) -> StoreResult<()> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("connection reset".to_string()));
        }
        self.inner.update_policy(policy, roster).await
    }

    async fn fetch_policy_by_id(&self, id: PolicyId) -> StoreResult<Option<Policy>> {
        self.inner.fetch_policy_by_id(id).await
    }

    async fn fetch_policy_by_key(&self, key: &str) -> StoreResult<Option<Policy>> {
        self.inner.fetch_policy_by_key(key).await
    }

    async fn fetch_policy_by_object(&self, object: &PolicyObject) -> StoreResult<Option<Policy>> {
        self.inner.fetch_policy_by_object(object).await
    }

    async fn delete_policy(&self, id: PolicyId) -> StoreResult<()> {
        self.inner.delete_policy(id).await
    }

    async fn fetch_roster_by_policy_id(&self, id: PolicyId) -> StoreResult<Option<RosterRecord>> {
        self.inner.fetch_roster_by_policy_id(id).await
    }
}

/// Store whose writes stall, and which can let a rival writer claim a
/// designator just before the next write lands
#[derive(Clone)]
pub struct ContendedStore {
    pub inner: MemoryStore,
    delay: Duration,
    rival: Arc<AtomicBool>,
}

impl ContendedStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryStore::new(),
            delay,
            rival: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Arm a rival write ahead of the next policy create or group upsert
    pub fn arm_rival(&self) {
        self.rival.store(true, Ordering::SeqCst);
    }

    fn take_rival(&self) -> bool {
        self.rival.swap(false, Ordering::SeqCst)
    }
}

#[async_trait]
impl PolicyStore for ContendedStore {
    async fn create_policy(
        &self,
        policy: Policy,
        roster: RosterRecord,
    ) -> StoreResult<(Policy, RosterRecord)> {
        tokio::time::sleep(self.delay).await;
        if self.take_rival() {
            // Same object, different key
            let rival = Policy {
                key: Some("rival".to_string()),
                ..policy.clone()
            };
            self.inner.create_policy(rival, RosterRecord::empty(0)).await?;
        }
        self.inner.create_policy(policy, roster).await
    }

    async fn update_policy(&self, policy: &Policy, roster: &RosterUpdate) -> StoreResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.update_policy(policy, roster).await
    }

    async fn fetch_policy_by_id(&self, id: PolicyId) -> StoreResult<Option<Policy>> {
        self.inner.fetch_policy_by_id(id).await
    }

    async fn fetch_policy_by_key(&self, key: &str) -> StoreResult<Option<Policy>> {
        self.inner.fetch_policy_by_key(key).await
    }

    async fn fetch_policy_by_object(&self, object: &PolicyObject) -> StoreResult<Option<Policy>> {
        self.inner.fetch_policy_by_object(object).await
    }

    async fn delete_policy(&self, id: PolicyId) -> StoreResult<()> {
        self.inner.delete_policy(id).await
    }

    async fn fetch_roster_by_policy_id(&self, id: PolicyId) -> StoreResult<Option<RosterRecord>> {
        self.inner.fetch_roster_by_policy_id(id).await
    }
}

#[async_trait]
impl GroupStore for ContendedStore {
    async fn upsert_group(&self, group: Group) -> StoreResult<Group> {
        tokio::time::sleep(self.delay).await;
        if self.take_rival() {
            let rival = Group {
                id: 0,
                parent_id: 0,
                ..group.clone()
            };
            self.inner.upsert_group(rival).await?;
        }
        self.inner.upsert_group(group).await
    }

    async fn fetch_group_by_id(&self, id: GroupId) -> StoreResult<Option<Group>> {
        self.inner.fetch_group_by_id(id).await
    }

    async fn fetch_group_by_key(&self, key: &str) -> StoreResult<Option<Group>> {
        self.inner.fetch_group_by_key(key).await
    }

    async fn fetch_group_by_name(&self, name: &str) -> StoreResult<Option<Group>> {
        self.inner.fetch_group_by_name(name).await
    }

    async fn fetch_all_groups(&self) -> StoreResult<Vec<Group>> {
        self.inner.fetch_all_groups().await
    }

    async fn fetch_child_groups(&self, parent_id: GroupId) -> StoreResult<Vec<Group>> {
        self.inner.fetch_child_groups(parent_id).await
    }

    async fn delete_group_by_id(&self, id: GroupId) -> StoreResult<()> {
        self.inner.delete_group_by_id(id).await
    }

    async fn create_relation(&self, group_id: GroupId, asset: Asset) -> StoreResult<()> {
        self.inner.create_relation(group_id, asset).await
    }

    async fn delete_relation(&self, group_id: GroupId, asset: Asset) -> StoreResult<()> {
        self.inner.delete_relation(group_id, asset).await
    }

    async fn fetch_all_relations(&self) -> StoreResult<Vec<Relation>> {
        self.inner.fetch_all_relations().await
    }

    async fn has_relation(&self, group_id: GroupId, asset: Asset) -> StoreResult<bool> {
        self.inner.has_relation(group_id, asset).await
    }
}

/// Access manager over a contended store with its own group manager
pub async fn contended(delay: Duration) -> (ContendedStore, Arc<GroupManager>, AccessManager) {
    let store = ContendedStore::new(delay);
    let groups = Arc::new(GroupManager::open(Arc::new(store.clone())).await.unwrap());
    let access = AccessManager::new(
        Arc::new(store.clone()),
        groups.clone(),
        ManagerConfig::default(),
    );
    (store, groups, access)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
