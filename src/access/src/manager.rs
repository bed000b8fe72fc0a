//! Access Manager
//!
//! Orchestrates policy and roster lifecycle, grant/revoke with rollback,
//! and rights resolution across the policy tree and the group tree.
//!
//! # Architecture
//!
//! ```text
//! has_rights ─→ resolution chain (inherit / extend walk over policies)
//!                  │
//!                  ├─→ Roster: everyone + own cell (+ owner override)
//!                  └─→ GroupManager: memberships → ancestry → nearest cell
//!                                                        │
//!                        [RightsCache, generation-stamped]┘
//! ```
//!
//! # Commit or restore
//!
//! A grant or revoke snapshots the roster on first use, applies its
//! change in memory and queues it. [`AccessManager::update`] persists
//! queued changes and drops the snapshot; any failure after the snapshot
//! was taken restores it, so a rejected call leaves no trace.
//!
//! Policy `update` and `set_parent` run one at a time under an async
//! mutex, so the cycle check always sees the tree it writes into.

use crate::cache::{CacheStats, Generation, RightsCache};
use crate::config::ManagerConfig;
use crate::error::{AccessError, Result, StoreError};
use crate::group::{GroupFlags, GroupKind, GroupManager};
use crate::policy::{Policy, PolicyFlags, PolicyObject};
use crate::right::Right;
use crate::roster::{ChangeAction, Roster, RosterRecord};
use crate::store::PolicyStore;
use crate::types::{Actor, ActorKind, GroupId, PolicyId, UserId};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct PolicyIndex {
    by_id: HashMap<PolicyId, Policy>,
    by_key: HashMap<String, PolicyId>,
    by_object: HashMap<PolicyObject, PolicyId>,
}

impl PolicyIndex {
    fn insert(&mut self, policy: Policy) {
        if let Some(key) = &policy.key {
            self.by_key.insert(key.clone(), policy.id);
        }
        if let Some(object) = &policy.object {
            self.by_object.insert(object.clone(), policy.id);
        }
        self.by_id.insert(policy.id, policy);
    }

    fn remove(&mut self, id: PolicyId) -> Option<Policy> {
        let policy = self.by_id.remove(&id)?;
        if let Some(key) = &policy.key {
            self.by_key.remove(key);
        }
        if let Some(object) = &policy.object {
            self.by_object.remove(object);
        }
        Some(policy)
    }
}

/// Policy, roster and rights-resolution manager
pub struct AccessManager {
    /// Durable owner of policies and rosters
    store: Arc<dyn PolicyStore>,

    /// Group memberships and hierarchy
    groups: Arc<GroupManager>,

    /// In-memory policy index
    index: RwLock<PolicyIndex>,

    /// Loaded rosters by policy
    rosters: DashMap<PolicyId, Arc<Roster>>,

    /// Held from the cycle check until the new parent is indexed
    hierarchy: Mutex<()>,

    /// Resolved-rights cache
    cache: Option<RightsCache>,

    /// Mutation counter shared with the group manager
    generation: Arc<Generation>,
}

impl AccessManager {
    /// Create a manager over a store and a group manager
    pub fn new(
        store: Arc<dyn PolicyStore>,
        groups: Arc<GroupManager>,
        config: ManagerConfig,
    ) -> Self {
        let generation = groups.generation();
        let cache = config
            .cache
            .enabled
            .then(|| RightsCache::new(&config.cache, Arc::clone(&generation)));

        info!(
            "AccessManager initialized with cache={} (capacity {})",
            config.cache.enabled, config.cache.capacity
        );

        Self {
            store,
            groups,
            index: RwLock::new(PolicyIndex::default()),
            rosters: DashMap::new(),
            hierarchy: Mutex::new(()),
            cache,
            generation,
        }
    }

    /// Group manager used for membership questions
    pub fn groups(&self) -> &Arc<GroupManager> {
        &self.groups
    }

    /// Resolved-rights cache statistics
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(RightsCache::stats)
    }

    // ------------------------------------------------------------------
    // Policy lifecycle
    // ------------------------------------------------------------------

    /// Create and persist a policy with an empty roster
    pub async fn create(
        &self,
        key: Option<&str>,
        owner_id: UserId,
        parent_id: PolicyId,
        object: Option<PolicyObject>,
        flags: PolicyFlags,
    ) -> Result<Policy> {
        let policy = Policy::new(key.map(str::to_string), owner_id, parent_id, object, flags)?;
        self.ensure_designators_free(&policy).await?;

        if parent_id != 0 {
            self.policy_by_id(parent_id).await?;
        }

        let (policy, record) = match self
            .store
            .create_policy(policy.clone(), RosterRecord::empty(0))
            .await
        {
            Ok(created) => created,
            Err(StoreError::Conflict(detail)) => {
                // Lost a race; name whichever designator the winner holds
                self.ensure_designators_free(&policy).await?;
                return Err(AccessError::store("new policy", StoreError::Conflict(detail)));
            }
            Err(e) => return Err(AccessError::store("new policy", e)),
        };

        if record.policy_id != policy.id {
            return Err(AccessError::EmptyRoster(policy.id));
        }

        self.index.write().insert(policy.clone());
        self.rosters
            .insert(policy.id, Arc::new(Roster::from_record(record)));

        info!("Policy created: {}", policy.designation());
        Ok(policy)
    }

    /// Persist field changes and queued roster changes
    ///
    /// Key and object designators are identity and cannot change.
    pub async fn update(&self, policy: Policy) -> Result<Policy> {
        let _hierarchy = self.hierarchy.lock().await;
        let current = self.policy_by_id(policy.id).await?;

        if policy.key != current.key {
            return Err(AccessError::ForbiddenChange("key"));
        }
        if let Some(field) = Self::object_change(&current.object, &policy.object) {
            return Err(AccessError::ForbiddenChange(field));
        }

        policy.validate()?;
        self.ensure_designators_free(&policy).await?;

        if policy.parent_id != 0 && policy.parent_id != current.parent_id {
            self.ensure_acyclic(policy.id, policy.parent_id).await?;
        }

        let updated = Policy {
            created_at: current.created_at,
            updated_at: Utc::now(),
            ..policy
        };

        let roster = self.roster(updated.id).await?;
        self.persist(&updated, &roster).await?;

        if updated.parent_id != current.parent_id || updated.flags != current.flags {
            roster.invalidate_cache();
        }

        debug!("Policy updated: {}", updated.designation());
        Ok(updated)
    }

    /// Re-attach a policy; zero detaches it and clears inherit/extend
    pub async fn set_parent(&self, policy_id: PolicyId, parent_id: PolicyId) -> Result<Policy> {
        let _hierarchy = self.hierarchy.lock().await;
        let mut policy = self.policy_by_id(policy_id).await?;

        if parent_id == 0 {
            policy.flags.remove(PolicyFlags::INHERIT | PolicyFlags::EXTEND);
        } else {
            self.policy_by_id(parent_id).await?;
            self.ensure_acyclic(policy_id, parent_id).await?;
        }

        policy.parent_id = parent_id;
        policy.updated_at = Utc::now();

        let roster = self.roster(policy_id).await?;
        self.persist(&policy, &roster).await?;
        roster.invalidate_cache();

        info!("Policy {} moved below {}", policy_id, parent_id);
        Ok(policy)
    }

    /// Delete a policy and its roster
    pub async fn delete_policy(&self, policy_id: PolicyId) -> Result<()> {
        let policy = self.policy_by_id(policy_id).await?;

        self.store
            .delete_policy(policy_id)
            .await
            .map_err(|e| AccessError::store(format!("policy {}", policy_id), e))?;

        self.index.write().remove(policy_id);
        self.rosters.remove(&policy_id);
        self.generation.bump();

        info!("Policy deleted: {}", policy.designation());
        Ok(())
    }

    /// Get a policy by ID
    pub async fn policy_by_id(&self, id: PolicyId) -> Result<Policy> {
        if id == 0 {
            return Err(AccessError::ZeroPolicyId);
        }

        let cached = self.index.read().by_id.get(&id).cloned();
        if let Some(policy) = cached {
            return Ok(policy);
        }

        let policy = self
            .store
            .fetch_policy_by_id(id)
            .await
            .map_err(|e| AccessError::store(format!("policy {}", id), e))?
            .ok_or_else(|| AccessError::PolicyNotFound(id.to_string()))?;

        self.index.write().insert(policy.clone());
        Ok(policy)
    }

    /// Get a policy by key
    pub async fn policy_by_key(&self, key: &str) -> Result<Policy> {
        let cached = {
            let index = self.index.read();
            index.by_key.get(key).and_then(|id| index.by_id.get(id)).cloned()
        };
        if let Some(policy) = cached {
            return Ok(policy);
        }

        let policy = self
            .store
            .fetch_policy_by_key(key)
            .await
            .map_err(|e| AccessError::store(format!("policy '{}'", key), e))?
            .ok_or_else(|| AccessError::PolicyNotFound(key.to_string()))?;

        self.index.write().insert(policy.clone());
        Ok(policy)
    }

    /// Get a policy by object designator
    pub async fn policy_by_object(&self, object: &PolicyObject) -> Result<Policy> {
        let cached = {
            let index = self.index.read();
            index
                .by_object
                .get(object)
                .and_then(|id| index.by_id.get(id))
                .cloned()
        };
        if let Some(policy) = cached {
            return Ok(policy);
        }

        let policy = self
            .store
            .fetch_policy_by_object(object)
            .await
            .map_err(|e| AccessError::store(format!("policy for {}", object), e))?
            .ok_or_else(|| AccessError::PolicyNotFound(object.to_string()))?;

        self.index.write().insert(policy.clone());
        Ok(policy)
    }

    /// Roster of a policy, loaded from the store on first use
    pub async fn roster(&self, policy_id: PolicyId) -> Result<Arc<Roster>> {
        if policy_id == 0 {
            return Err(AccessError::ZeroPolicyId);
        }

        if let Some(roster) = self.rosters.get(&policy_id) {
            return Ok(Arc::clone(roster.value()));
        }

        let record = self
            .store
            .fetch_roster_by_policy_id(policy_id)
            .await
            .map_err(|e| AccessError::store(format!("roster of policy {}", policy_id), e))?
            .ok_or(AccessError::NilRoster(policy_id))?;

        if record.policy_id != policy_id {
            return Err(AccessError::EmptyRoster(policy_id));
        }

        let roster = self
            .rosters
            .entry(policy_id)
            .or_insert_with(|| Arc::new(Roster::from_record(record)));
        Ok(Arc::clone(roster.value()))
    }

    // ------------------------------------------------------------------
    // Grant / revoke
    // ------------------------------------------------------------------

    /// Grant rights to any kind of actor
    pub async fn grant_access(
        &self,
        policy_id: PolicyId,
        grantor: &Actor,
        grantee: &Actor,
        rights: Right,
    ) -> Result<()> {
        match grantee.kind {
            ActorKind::Everyone => self.grant_public_access(policy_id, grantor, rights).await,
            ActorKind::User => {
                self.grant_user_access(policy_id, grantor, grantee.id, rights)
                    .await
            }
            ActorKind::RoleGroup => {
                self.grant_role_access(policy_id, grantor, grantee.id, rights)
                    .await
            }
            ActorKind::Group => {
                self.grant_group_access(policy_id, grantor, grantee.id, rights)
                    .await
            }
        }
    }

    /// Set the public rights
    pub async fn grant_public_access(
        &self,
        policy_id: PolicyId,
        grantor: &Actor,
        rights: Right,
    ) -> Result<()> {
        self.grant(policy_id, grantor, Actor::everyone(), rights).await
    }

    /// Set the rights of a user
    pub async fn grant_user_access(
        &self,
        policy_id: PolicyId,
        grantor: &Actor,
        user_id: UserId,
        rights: Right,
    ) -> Result<()> {
        if user_id == 0 {
            return Err(AccessError::InvalidInput("user id is zero".to_string()));
        }
        self.grant(policy_id, grantor, Actor::user(user_id), rights).await
    }

    /// Set the rights of a role
    pub async fn grant_role_access(
        &self,
        policy_id: PolicyId,
        grantor: &Actor,
        role_id: GroupId,
        rights: Right,
    ) -> Result<()> {
        self.ensure_group_kind(role_id, GroupKind::Role).await?;
        self.grant(policy_id, grantor, Actor::role(role_id), rights).await
    }

    /// Set the rights of a group
    pub async fn grant_group_access(
        &self,
        policy_id: PolicyId,
        grantor: &Actor,
        group_id: GroupId,
        rights: Right,
    ) -> Result<()> {
        self.ensure_group_kind(group_id, GroupKind::Group).await?;
        self.grant(policy_id, grantor, Actor::group(group_id), rights).await
    }

    /// Remove the grantee's own entry (everyone falls back to no access)
    ///
    /// Broader rights, such as public ones, stay in effect.
    pub async fn revoke_access(
        &self,
        policy_id: PolicyId,
        grantor: &Actor,
        grantee: &Actor,
    ) -> Result<()> {
        let grantee = Actor::new(grantee.kind, grantee.id);
        if !grantee.is_everyone() && grantee.id == 0 {
            return Err(AccessError::InvalidInput(format!(
                "{} has a zero id",
                grantee.kind
            )));
        }

        let roster = self.mutable_roster(policy_id).await?;
        roster.ensure_backup();

        let outcome = match self.effective_access(policy_id, grantor).await {
            Ok(held) if held.satisfies(Right::MANAGE_ACCESS) => {
                roster.change(ChangeAction::Unset, grantee, Right::NONE);
                Ok(())
            }
            Ok(_) => Err(AccessError::AccessDenied(format!(
                "{} cannot manage access of policy {}",
                grantor, policy_id
            ))),
            Err(e) => Err(e),
        };

        self.settle(&roster, outcome)
    }

    async fn grant(
        &self,
        policy_id: PolicyId,
        grantor: &Actor,
        grantee: Actor,
        rights: Right,
    ) -> Result<()> {
        let roster = self.mutable_roster(policy_id).await?;
        roster.ensure_backup();

        let required = Right::MANAGE_ACCESS | rights;
        let outcome = match self.effective_access(policy_id, grantor).await {
            Ok(held) if held.satisfies(required) => {
                roster.change(ChangeAction::Set, grantee, rights);
                Ok(())
            }
            Ok(held) => {
                warn!(
                    "Grant of {} to {} on policy {} rejected: {} lacks {}",
                    rights,
                    grantee,
                    policy_id,
                    grantor,
                    held.missing(required)
                );
                Err(AccessError::ExcessOfRights(held.missing(required).to_string()))
            }
            Err(e) => Err(e),
        };

        self.settle(&roster, outcome)
    }

    // Restore the roster on failure; either way cached resolutions are stale.
    fn settle(&self, roster: &Roster, outcome: Result<()>) -> Result<()> {
        if let Err(e) = &outcome {
            if roster.restore_backup() {
                warn!("Roster {} restored after failure: {}", roster.policy_id(), e);
            }
        }
        self.generation.bump();
        outcome
    }

    async fn mutable_roster(&self, policy_id: PolicyId) -> Result<Arc<Roster>> {
        self.policy_by_id(policy_id).await?;
        self.roster(policy_id).await
    }

    // ------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------

    /// Whether the actor holds every requested right
    pub async fn has_rights(
        &self,
        policy_id: PolicyId,
        actor: &Actor,
        rights: Right,
    ) -> Result<bool> {
        match actor.kind {
            ActorKind::Everyone => self.public_has_access(policy_id, rights).await,
            ActorKind::User => self.user_has_access(policy_id, actor.id, rights).await,
            ActorKind::RoleGroup => self.role_has_access(policy_id, actor.id, rights).await,
            ActorKind::Group => self.group_has_access(policy_id, actor.id, rights).await,
        }
    }

    /// Like [`has_rights`](Self::has_rights) but fails with `AccessDenied`
    pub async fn check_access(
        &self,
        policy_id: PolicyId,
        actor: &Actor,
        rights: Right,
    ) -> Result<()> {
        let held = self.effective_access(policy_id, actor).await?;
        if held.satisfies(rights) {
            return Ok(());
        }
        Err(AccessError::AccessDenied(format!(
            "{} lacks {} on policy {}",
            actor,
            held.missing(rights),
            policy_id
        )))
    }

    /// Whether the public holds every requested right
    pub async fn public_has_access(&self, policy_id: PolicyId, rights: Right) -> Result<bool> {
        let held = self.effective_access(policy_id, &Actor::everyone()).await?;
        Ok(held.satisfies(rights))
    }

    /// Whether the user holds every requested right
    pub async fn user_has_access(
        &self,
        policy_id: PolicyId,
        user_id: UserId,
        rights: Right,
    ) -> Result<bool> {
        let held = self.effective_user_access(policy_id, user_id).await?;
        Ok(held.satisfies(rights))
    }

    /// Whether the role holds every requested right
    pub async fn role_has_access(
        &self,
        policy_id: PolicyId,
        role_id: GroupId,
        rights: Right,
    ) -> Result<bool> {
        let held = self.effective_access(policy_id, &Actor::role(role_id)).await?;
        Ok(held.satisfies(rights))
    }

    /// Whether the group holds every requested right
    pub async fn group_has_access(
        &self,
        policy_id: PolicyId,
        group_id: GroupId,
        rights: Right,
    ) -> Result<bool> {
        let held = self.effective_access(policy_id, &Actor::group(group_id)).await?;
        Ok(held.satisfies(rights))
    }

    /// Resolved rights of a user after the inherit/extend walk
    pub async fn effective_user_access(&self, policy_id: PolicyId, user_id: UserId) -> Result<Right> {
        self.effective_access(policy_id, &Actor::user(user_id)).await
    }

    /// Resolved rights of any actor after the inherit/extend walk
    ///
    /// An inherited policy contributes nothing itself and defers to its
    /// parent; an extended one adds its own rights to the parent's.
    pub async fn effective_access(&self, policy_id: PolicyId, actor: &Actor) -> Result<Right> {
        let actor = Actor::new(actor.kind, actor.id);

        if let Some(cache) = &self.cache {
            if let Some(rights) = cache.get(policy_id, &actor) {
                debug!("Cache hit for {} on policy {}", actor, policy_id);
                return Ok(rights);
            }
        }

        let stamp = self.generation.current();
        let chain = self.resolution_chain(policy_id).await?;

        let mut rights = Right::NONE;
        for policy in &chain {
            rights |= self.summarize(policy, &actor).await?;
        }

        debug!(
            "Resolved {} for {} on policy {} over {} policies",
            rights,
            actor,
            policy_id,
            chain.len()
        );

        if let Some(cache) = &self.cache {
            cache.put(policy_id, actor, rights, stamp);
        }
        Ok(rights)
    }

    /// Everyone, group, own and owner rights of a user on one policy
    ///
    /// Only this policy's roster is consulted; see
    /// [`effective_user_access`](Self::effective_user_access) for the
    /// inherit/extend walk.
    pub async fn summarized_user_access(&self, policy_id: PolicyId, user_id: UserId) -> Result<Right> {
        let policy = self.policy_by_id(policy_id).await?;
        self.summarize(&policy, &Actor::user(user_id)).await
    }

    /// Rights of a group on one policy: its own cell, else the nearest
    /// ancestor's, else none
    pub async fn group_access(&self, policy_id: PolicyId, group_id: GroupId) -> Result<Right> {
        self.policy_by_id(policy_id).await?;
        let roster = self.roster(policy_id).await?;
        self.group_access_in(&roster, group_id).await
    }

    async fn summarize(&self, policy: &Policy, actor: &Actor) -> Result<Right> {
        let roster = self.roster(policy.id).await?;
        let mut rights = roster.everyone();

        match actor.kind {
            ActorKind::Everyone => {}
            ActorKind::User => {
                for group in self.groups.groups_by_asset(GroupFlags::ANY_KIND, actor) {
                    rights |= self.group_access_in(&roster, group.id).await?;
                }
                if let Some(own) = roster.lookup(actor) {
                    rights |= own;
                }
                if policy.is_owner(actor.id) {
                    rights |= Right::FULL_ACCESS;
                }
            }
            ActorKind::RoleGroup | ActorKind::Group => {
                rights |= self.group_access_in(&roster, actor.id).await?;
            }
        }

        Ok(rights)
    }

    async fn group_access_in(&self, roster: &Roster, group_id: GroupId) -> Result<Right> {
        for group in self.groups.ancestry(group_id).await? {
            if let Some(rights) = roster.lookup(&group.actor()) {
                return Ok(rights);
            }
        }
        Ok(Right::NONE)
    }

    // Policies whose rosters contribute to `policy_id`, nearest first.
    async fn resolution_chain(&self, policy_id: PolicyId) -> Result<Vec<Policy>> {
        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        let mut next = policy_id;

        loop {
            if !visited.insert(next) {
                return Err(AccessError::CircularParent(next));
            }

            let policy = self.policy_by_id(next).await?;
            if policy.is_inherited() {
                next = policy.parent_id;
                continue;
            }

            let extended = policy.is_extended();
            next = policy.parent_id;
            chain.push(policy);
            if !extended {
                return Ok(chain);
            }
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn persist(&self, policy: &Policy, roster: &Roster) -> Result<()> {
        let update = roster.update();

        if let Err(e) = self.store.update_policy(policy, &update).await {
            if roster.restore_backup() {
                warn!(
                    "Roster {} restored after failed persist: {}",
                    policy.id, e
                );
            }
            self.generation.bump();
            return Err(AccessError::store(format!("policy {}", policy.id), e));
        }

        roster.commit();
        self.index.write().insert(policy.clone());
        self.generation.bump();
        Ok(())
    }

    async fn ensure_designators_free(&self, policy: &Policy) -> Result<()> {
        if let Some(key) = &policy.key {
            let indexed = self.index.read().by_key.get(key).copied();
            let taken = match indexed {
                Some(id) => id != policy.id,
                None => self
                    .store
                    .fetch_policy_by_key(key)
                    .await
                    .map_err(|e| AccessError::store(format!("policy '{}'", key), e))?
                    .map_or(false, |other| other.id != policy.id),
            };
            if taken {
                return Err(AccessError::PolicyKeyTaken(key.clone()));
            }
        }

        if let Some(object) = &policy.object {
            let indexed = self.index.read().by_object.get(object).copied();
            let taken = match indexed {
                Some(id) => id != policy.id,
                None => self
                    .store
                    .fetch_policy_by_object(object)
                    .await
                    .map_err(|e| AccessError::store(format!("policy for {}", object), e))?
                    .map_or(false, |other| other.id != policy.id),
            };
            if taken {
                return Err(AccessError::PolicyObjectConflict(object.to_string()));
            }
        }

        Ok(())
    }

    async fn ensure_acyclic(&self, policy_id: PolicyId, parent_id: PolicyId) -> Result<()> {
        let mut visited = HashSet::new();
        let mut next = parent_id;

        while next != 0 {
            if next == policy_id || !visited.insert(next) {
                return Err(AccessError::CircularParent(policy_id));
            }
            next = self.policy_by_id(next).await?.parent_id;
        }
        Ok(())
    }

    async fn ensure_group_kind(&self, group_id: GroupId, kind: GroupKind) -> Result<()> {
        let group = self.groups.group_by_id(group_id).await?;
        if group.kind() != Some(kind) {
            return Err(AccessError::GroupKindMismatch(format!(
                "group {} is not of kind {:?}",
                group_id, kind
            )));
        }
        Ok(())
    }

    fn object_change(
        current: &Option<PolicyObject>,
        requested: &Option<PolicyObject>,
    ) -> Option<&'static str> {
        match (current, requested) {
            (None, None) => None,
            (Some(a), Some(b)) if a.name != b.name => Some("object_name"),
            (Some(a), Some(b)) if a.id != b.id => Some("object_id"),
            (Some(_), Some(_)) => None,
            _ => Some("object"),
        }
    }
}
