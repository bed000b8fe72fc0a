//! Group hierarchy and membership manager
//!
//! The manager owns an in-memory index of groups and relations backed by
//! a [`GroupStore`]. It answers two questions for rights resolution:
//! which groups an asset belongs to, and what the ancestry of a group is.
//!
//! # Thread Safety
//!
//! One `parking_lot::RwLock` guards the index. It is never held across
//! an `.await`: store calls happen first, the index is updated after.
//!
//! Hierarchy changes (create, update, delete, set_parent) are serialized
//! by an async mutex held from validation through persist and index
//! update, so two reparents can never both pass the cycle check against
//! the same tree.

use super::{Group, GroupFlags, GroupKind};
use crate::cache::Generation;
use crate::error::{AccessError, Result, StoreError};
use crate::store::GroupStore;
use crate::types::{ActorKind, Asset, GroupId};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct GroupIndex {
    by_id: HashMap<GroupId, Group>,
    by_key: HashMap<String, GroupId>,
    members: HashMap<GroupId, HashSet<Asset>>,
    memberships: HashMap<Asset, HashSet<GroupId>>,
    defaults: HashSet<GroupId>,
}

impl GroupIndex {
    fn insert(&mut self, group: Group) {
        if let Some(previous) = self.by_id.get(&group.id) {
            if previous.key != group.key {
                self.by_key.remove(&previous.key);
            }
        }

        if group.is_default() {
            self.defaults.insert(group.id);
        } else {
            self.defaults.remove(&group.id);
        }

        self.by_key.insert(group.key.clone(), group.id);
        self.by_id.insert(group.id, group);
    }

    fn remove(&mut self, id: GroupId) -> Option<Group> {
        let group = self.by_id.remove(&id)?;
        self.by_key.remove(&group.key);
        self.defaults.remove(&id);

        for asset in self.members.remove(&id).unwrap_or_default() {
            if let Some(groups) = self.memberships.get_mut(&asset) {
                groups.remove(&id);
            }
        }
        Some(group)
    }

    fn link(&mut self, group_id: GroupId, asset: Asset) -> bool {
        self.memberships.entry(asset).or_default().insert(group_id);
        self.members.entry(group_id).or_default().insert(asset)
    }

    fn unlink(&mut self, group_id: GroupId, asset: Asset) -> bool {
        if let Some(groups) = self.memberships.get_mut(&asset) {
            groups.remove(&group_id);
        }
        self.members
            .get_mut(&group_id)
            .map_or(false, |assets| assets.remove(&asset))
    }

    fn is_member(&self, group_id: GroupId, asset: &Asset) -> bool {
        self.members
            .get(&group_id)
            .map_or(false, |assets| assets.contains(asset))
    }

    fn has_children(&self, id: GroupId) -> bool {
        self.by_id.values().any(|g| g.parent_id == id)
    }
}

/// Manager of the group/role hierarchy and its relations
pub struct GroupManager {
    store: Arc<dyn GroupStore>,
    index: RwLock<GroupIndex>,
    hierarchy: Mutex<()>,
    generation: Arc<Generation>,
}

impl GroupManager {
    /// Create a manager over a store and load every group and relation
    ///
    /// Membership answers come from the index alone, so it is always
    /// loaded in full.
    pub async fn open(store: Arc<dyn GroupStore>) -> Result<Self> {
        let manager = Self {
            store,
            index: RwLock::new(GroupIndex::default()),
            hierarchy: Mutex::new(()),
            generation: Generation::new(),
        };
        manager.load().await?;
        Ok(manager)
    }

    /// Replace the index with everything in the store
    pub async fn load(&self) -> Result<()> {
        let groups = self
            .store
            .fetch_all_groups()
            .await
            .map_err(|e| AccessError::store("all groups", e))?;
        let relations = self
            .store
            .fetch_all_relations()
            .await
            .map_err(|e| AccessError::store("all relations", e))?;

        let mut index = GroupIndex::default();
        for group in groups {
            index.insert(group);
        }
        for relation in &relations {
            index.link(relation.group_id, relation.asset);
        }

        info!(
            "GroupManager loaded {} groups and {} relations",
            index.by_id.len(),
            relations.len()
        );

        *self.index.write() = index;
        self.generation.bump();
        Ok(())
    }

    /// Mutation counter shared with the access manager
    pub fn generation(&self) -> Arc<Generation> {
        Arc::clone(&self.generation)
    }

    /// Create a group or role
    pub async fn create(
        &self,
        flags: GroupFlags,
        parent_id: GroupId,
        key: &str,
        display_name: &str,
    ) -> Result<Group> {
        let group = Group::new(flags, parent_id, key, display_name)?;
        let kind = group.kind().ok_or_else(|| {
            AccessError::InvalidGroup(format!("group '{}' has no kind", key))
        })?;

        let _hierarchy = self.hierarchy.lock().await;

        if parent_id != 0 {
            self.validate_parent(0, kind, parent_id).await?;
        }
        self.ensure_key_free(key, 0).await?;

        let group = self
            .store
            .upsert_group(group)
            .await
            .map_err(|e| Self::map_key_conflict(key, e))?;

        self.index.write().insert(group.clone());
        self.generation.bump();

        info!("Group created: {} '{}' ({:?})", group.id, group.key, kind);
        Ok(group)
    }

    /// Update display name, key or default flag of a group
    ///
    /// Kind and parent cannot change here; use [`set_parent`](Self::set_parent)
    /// to move a group.
    pub async fn update(&self, group: Group) -> Result<Group> {
        let _hierarchy = self.hierarchy.lock().await;
        let current = self.group_by_id(group.id).await?;
        group.validate()?;

        if group.kind() != current.kind() {
            return Err(AccessError::GroupKindMismatch(format!(
                "group {} cannot change its kind",
                group.id
            )));
        }
        if group.parent_id != current.parent_id {
            return Err(AccessError::ForbiddenChange("parent_id"));
        }
        if group.key != current.key {
            self.ensure_key_free(&group.key, group.id).await?;
        }

        let key = group.key.clone();
        let updated = Group {
            created_at: current.created_at,
            updated_at: Utc::now(),
            ..group
        };
        let updated = self
            .store
            .upsert_group(updated)
            .await
            .map_err(|e| Self::map_key_conflict(&key, e))?;

        self.index.write().insert(updated.clone());
        self.generation.bump();

        debug!("Group updated: {} '{}'", updated.id, updated.key);
        Ok(updated)
    }

    /// Delete a group and, best-effort, its relations
    pub async fn delete(&self, group_id: GroupId) -> Result<()> {
        let _hierarchy = self.hierarchy.lock().await;
        let group = self.group_by_id(group_id).await?;

        let stored_children = self
            .store
            .fetch_child_groups(group_id)
            .await
            .map_err(|e| AccessError::store(format!("children of group {}", group_id), e))?;
        if !stored_children.is_empty() {
            return Err(AccessError::GroupHasChildren(group_id));
        }

        let members: Vec<Asset> = {
            let index = self.index.read();
            if index.has_children(group_id) {
                return Err(AccessError::GroupHasChildren(group_id));
            }
            index
                .members
                .get(&group_id)
                .map(|assets| assets.iter().copied().collect())
                .unwrap_or_default()
        };

        for asset in members {
            if let Err(e) = self.store.delete_relation(group_id, asset).await {
                warn!(
                    "Failed to remove relation of {} to deleted group {}: {}",
                    asset, group_id, e
                );
            }
        }

        self.store
            .delete_group_by_id(group_id)
            .await
            .map_err(|e| AccessError::store(format!("group {}", group_id), e))?;

        self.index.write().remove(group_id);
        self.generation.bump();

        info!("Group deleted: {} '{}'", group.id, group.key);
        Ok(())
    }

    /// Make an asset a member of a group
    pub async fn create_relation(&self, group_id: GroupId, asset: Asset) -> Result<()> {
        Self::validate_asset(&asset)?;
        self.group_by_id(group_id).await?;

        if self.is_member(group_id, &asset) {
            return Err(AccessError::AlreadyMember(group_id));
        }
        let stored = self
            .store
            .has_relation(group_id, asset)
            .await
            .map_err(|e| AccessError::store(format!("relation {} -> {}", asset, group_id), e))?;
        if stored {
            self.index.write().link(group_id, asset);
            return Err(AccessError::AlreadyMember(group_id));
        }

        self.store
            .create_relation(group_id, asset)
            .await
            .map_err(|e| AccessError::store(format!("relation {} -> {}", asset, group_id), e))?;

        self.index.write().link(group_id, asset);
        self.generation.bump();

        debug!("Relation created: {} -> group {}", asset, group_id);
        Ok(())
    }

    /// Remove an asset from a group
    pub async fn delete_relation(&self, group_id: GroupId, asset: Asset) -> Result<()> {
        if !self.is_member(group_id, &asset) {
            let stored = self
                .store
                .has_relation(group_id, asset)
                .await
                .map_err(|e| {
                    AccessError::store(format!("relation {} -> {}", asset, group_id), e)
                })?;
            if !stored {
                return Err(AccessError::NotMember(group_id));
            }
        }

        self.store
            .delete_relation(group_id, asset)
            .await
            .map_err(|e| AccessError::store(format!("relation {} -> {}", asset, group_id), e))?;

        self.index.write().unlink(group_id, asset);
        self.generation.bump();

        debug!("Relation deleted: {} -> group {}", asset, group_id);
        Ok(())
    }

    /// Relate an asset to every default group it is not yet in
    ///
    /// Returns the groups that were joined.
    pub async fn assign_default_groups(&self, asset: Asset) -> Result<Vec<GroupId>> {
        Self::validate_asset(&asset)?;

        let mut pending: Vec<GroupId> = {
            let index = self.index.read();
            index
                .defaults
                .iter()
                .copied()
                .filter(|id| !index.is_member(*id, &asset))
                .collect()
        };
        pending.sort_unstable();

        let mut joined = Vec::with_capacity(pending.len());
        for group_id in pending {
            match self.create_relation(group_id, asset).await {
                Ok(()) => joined.push(group_id),
                Err(AccessError::AlreadyMember(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(joined)
    }

    /// Move a group below another parent, zero detaches it
    pub async fn set_parent(&self, group_id: GroupId, parent_id: GroupId) -> Result<Group> {
        let _hierarchy = self.hierarchy.lock().await;
        let mut group = self.group_by_id(group_id).await?;
        let kind = group.kind().ok_or_else(|| {
            AccessError::InvalidGroup(format!("group {} has no kind", group_id))
        })?;

        if parent_id != 0 {
            self.validate_parent(group_id, kind, parent_id).await?;
        }

        group.parent_id = parent_id;
        group.updated_at = Utc::now();
        let group = self
            .store
            .upsert_group(group)
            .await
            .map_err(|e| AccessError::store(format!("group {}", group_id), e))?;

        self.index.write().insert(group.clone());
        self.generation.bump();

        info!("Group {} moved below {}", group_id, parent_id);
        Ok(group)
    }

    /// Get a group by ID
    pub async fn group_by_id(&self, id: GroupId) -> Result<Group> {
        if id == 0 {
            return Err(AccessError::GroupNotFound("0".to_string()));
        }

        let cached = self.index.read().by_id.get(&id).cloned();
        if let Some(group) = cached {
            return Ok(group);
        }

        let group = self
            .store
            .fetch_group_by_id(id)
            .await
            .map_err(|e| AccessError::store(format!("group {}", id), e))?
            .ok_or_else(|| AccessError::GroupNotFound(id.to_string()))?;

        self.index.write().insert(group.clone());
        Ok(group)
    }

    /// Get a group by key
    pub async fn group_by_key(&self, key: &str) -> Result<Group> {
        let cached = {
            let index = self.index.read();
            index
                .by_key
                .get(key)
                .and_then(|id| index.by_id.get(id))
                .cloned()
        };
        if let Some(group) = cached {
            return Ok(group);
        }

        let group = self
            .store
            .fetch_group_by_key(key)
            .await
            .map_err(|e| AccessError::store(format!("group '{}'", key), e))?
            .ok_or_else(|| AccessError::GroupNotFound(key.to_string()))?;

        self.index.write().insert(group.clone());
        Ok(group)
    }

    /// Get a group by display name
    pub async fn group_by_name(&self, name: &str) -> Result<Group> {
        let cached = self
            .index
            .read()
            .by_id
            .values()
            .find(|g| g.display_name == name)
            .cloned();
        if let Some(group) = cached {
            return Ok(group);
        }

        let group = self
            .store
            .fetch_group_by_name(name)
            .await
            .map_err(|e| AccessError::store(format!("group named '{}'", name), e))?
            .ok_or_else(|| AccessError::GroupNotFound(name.to_string()))?;

        self.index.write().insert(group.clone());
        Ok(group)
    }

    /// Groups matching the kind mask of which the asset is a member
    pub fn groups_by_asset(&self, mask: GroupFlags, asset: &Asset) -> Vec<Group> {
        let kinds = mask & GroupFlags::ANY_KIND;
        let index = self.index.read();

        let mut groups: Vec<Group> = index
            .memberships
            .get(asset)
            .into_iter()
            .flatten()
            .filter_map(|id| index.by_id.get(id))
            .filter(|g| g.flags.intersects(kinds))
            .cloned()
            .collect();
        groups.sort_by_key(|g| g.id);
        groups
    }

    /// Members of a group
    pub fn members(&self, group_id: GroupId) -> Vec<Asset> {
        let mut members: Vec<Asset> = self
            .index
            .read()
            .members
            .get(&group_id)
            .map(|assets| assets.iter().copied().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    /// Whether the asset is a recorded member of the group
    pub fn is_member(&self, group_id: GroupId, asset: &Asset) -> bool {
        self.index.read().is_member(group_id, asset)
    }

    /// Groups flagged as default
    pub fn default_groups(&self) -> Vec<Group> {
        let index = self.index.read();
        let mut groups: Vec<Group> = index
            .defaults
            .iter()
            .filter_map(|id| index.by_id.get(id))
            .cloned()
            .collect();
        groups.sort_by_key(|g| g.id);
        groups
    }

    /// Number of indexed groups
    pub fn len(&self) -> usize {
        self.index.read().by_id.len()
    }

    /// Whether no groups are indexed
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The group followed by its ancestors, nearest first
    ///
    /// The walk tracks visited ids, so it ends either at a root or on the
    /// first repeated id, which is reported as [`AccessError::CircularGroup`].
    pub async fn ancestry(&self, group_id: GroupId) -> Result<Vec<Group>> {
        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        let mut next = group_id;

        while next != 0 {
            if !visited.insert(next) {
                return Err(AccessError::CircularGroup(next));
            }
            let group = self.group_by_id(next).await?;
            next = group.parent_id;
            chain.push(group);
        }

        Ok(chain)
    }

    /// Whether the parent chain of a group loops
    pub async fn is_circuited(&self, group_id: GroupId) -> Result<bool> {
        match self.ancestry(group_id).await {
            Ok(_) => Ok(false),
            Err(AccessError::CircularGroup(_)) => Ok(true),
            Err(e) => Err(e),
        }
    }

    async fn validate_parent(
        &self,
        child_id: GroupId,
        kind: GroupKind,
        parent_id: GroupId,
    ) -> Result<()> {
        if child_id != 0 && parent_id == child_id {
            return Err(AccessError::CircularGroup(child_id));
        }

        let parent = self.group_by_id(parent_id).await?;
        if parent.kind() != Some(kind) {
            return Err(AccessError::GroupKindMismatch(format!(
                "parent {} is not of kind {:?}",
                parent_id, kind
            )));
        }

        let ancestors = self.ancestry(parent_id).await?;
        if child_id != 0 && ancestors.iter().any(|g| g.id == child_id) {
            return Err(AccessError::CircularGroup(child_id));
        }

        Ok(())
    }

    async fn ensure_key_free(&self, key: &str, own_id: GroupId) -> Result<()> {
        let indexed = self.index.read().by_key.get(key).copied();
        if indexed.map_or(false, |id| id != own_id) {
            return Err(AccessError::GroupKeyTaken(key.to_string()));
        }

        let stored = self
            .store
            .fetch_group_by_key(key)
            .await
            .map_err(|e| AccessError::store(format!("group '{}'", key), e))?;
        if stored.map_or(false, |g| g.id != own_id) {
            return Err(AccessError::GroupKeyTaken(key.to_string()));
        }

        Ok(())
    }

    fn validate_asset(asset: &Asset) -> Result<()> {
        if asset.kind == ActorKind::Everyone || asset.id == 0 {
            return Err(AccessError::InvalidAsset(format!(
                "'{}' cannot be a group member",
                asset
            )));
        }
        Ok(())
    }

    fn map_key_conflict(key: &str, e: StoreError) -> AccessError {
        match e {
            StoreError::Conflict(_) => AccessError::GroupKeyTaken(key.to_string()),
            other => AccessError::store(format!("group '{}'", key), other),
        }
    }
}
