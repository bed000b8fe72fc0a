//! Per-policy rights registry
//!
//! A [`Roster`] holds the public ("everyone") right and one cell per
//! actor. Mutations are applied in memory and appended to a pending
//! change log; the first mutation after a commit snapshots the whole
//! roster so a failed batch can be rolled back as one unit.
//!
//! # Locking
//!
//! Three independent locks: the registry (everyone + cells), the
//! calculated cache, and the change log (pending + backup). They are
//! always taken in the order log → registry → cache.

use crate::right::Right;
use crate::types::{Actor, PolicyId};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Rights of a single actor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub actor: Actor,
    pub rights: Right,
}

/// Kind of roster change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    /// Set the actor's rights
    Set,
    /// Remove the actor's cell (reset everyone to no access)
    Unset,
}

/// One queued roster mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub action: ChangeAction,
    pub actor: Actor,
    pub rights: Right,
}

/// Persistable roster state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterRecord {
    /// Owning policy
    pub policy_id: PolicyId,

    /// Public rights
    pub everyone: Right,

    /// Per-actor cells
    #[serde(default)]
    pub cells: Vec<Cell>,
}

impl RosterRecord {
    /// Empty roster for a policy
    pub fn empty(policy_id: PolicyId) -> Self {
        Self {
            policy_id,
            everyone: Right::NONE,
            cells: Vec::new(),
        }
    }
}

/// Roster state handed to the store on update: the full record plus
/// the changes queued since the last commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterUpdate {
    pub record: RosterRecord,
    pub changes: Vec<Change>,
}

#[derive(Debug, Clone, Default)]
struct Registry {
    everyone: Right,
    cells: Vec<Cell>,
}

impl Registry {
    fn position(&self, actor: &Actor) -> Option<usize> {
        self.cells.iter().position(|cell| cell.actor == *actor)
    }

    fn apply(&mut self, change: &Change) {
        if change.actor.is_everyone() {
            self.everyone = match change.action {
                ChangeAction::Set => change.rights,
                ChangeAction::Unset => Right::NONE,
            };
            return;
        }

        match (change.action, self.position(&change.actor)) {
            (ChangeAction::Set, Some(idx)) => self.cells[idx].rights = change.rights,
            (ChangeAction::Set, None) => self.cells.push(Cell {
                actor: change.actor,
                rights: change.rights,
            }),
            (ChangeAction::Unset, Some(idx)) => {
                self.cells.remove(idx);
            }
            (ChangeAction::Unset, None) => {}
        }
    }
}

#[derive(Debug, Clone)]
struct Snapshot {
    registry: Registry,
    calculated: HashMap<Actor, Right>,
}

#[derive(Debug, Default)]
struct ChangeLog {
    pending: Vec<Change>,
    backup: Option<Snapshot>,
}

/// Rights registry of one policy
#[derive(Debug)]
pub struct Roster {
    policy_id: PolicyId,
    registry: RwLock<Registry>,
    calculated: RwLock<HashMap<Actor, Right>>,
    log: Mutex<ChangeLog>,
}

impl Roster {
    /// Create an empty roster
    pub fn new(policy_id: PolicyId) -> Self {
        Self::from_record(RosterRecord::empty(policy_id))
    }

    /// Rebuild a roster from persisted state
    pub fn from_record(record: RosterRecord) -> Self {
        let mut registry = Registry {
            everyone: record.everyone,
            cells: Vec::with_capacity(record.cells.len()),
        };
        // Keep the one-cell-per-actor invariant even for sloppy records
        for cell in record.cells {
            registry.apply(&Change {
                action: ChangeAction::Set,
                actor: cell.actor,
                rights: cell.rights,
            });
        }

        Self {
            policy_id: record.policy_id,
            registry: RwLock::new(registry),
            calculated: RwLock::new(HashMap::new()),
            log: Mutex::new(ChangeLog::default()),
        }
    }

    /// Owning policy
    pub fn policy_id(&self) -> PolicyId {
        self.policy_id
    }

    /// Public rights
    pub fn everyone(&self) -> Right {
        self.registry.read().everyone
    }

    /// Copy of all actor cells
    pub fn cells(&self) -> Vec<Cell> {
        self.registry.read().cells.clone()
    }

    /// Current state as a persistable record
    pub fn record(&self) -> RosterRecord {
        let registry = self.registry.read();
        RosterRecord {
            policy_id: self.policy_id,
            everyone: registry.everyone,
            cells: registry.cells.clone(),
        }
    }

    /// Record plus pending changes, for the store
    pub fn update(&self) -> RosterUpdate {
        let log = self.log.lock();
        RosterUpdate {
            record: self.record(),
            changes: log.pending.clone(),
        }
    }

    /// Explicit rights of an actor, `None` when it has no cell
    ///
    /// The everyone value is returned for the public actor.
    pub fn lookup(&self, actor: &Actor) -> Option<Right> {
        if actor.is_everyone() {
            return Some(self.everyone());
        }

        if let Some(cached) = self.calculated.read().get(actor) {
            return Some(*cached);
        }

        // Only actors with a cell are remembered, which keeps the map no
        // larger than the registry. Populate while the registry is still
        // read-locked so a concurrent change cannot slip in between the
        // scan and the insert.
        let registry = self.registry.read();
        let found = registry
            .position(actor)
            .map(|idx| registry.cells[idx].rights);
        if let Some(rights) = found {
            self.calculated.write().insert(*actor, rights);
        }
        found
    }

    /// Take a snapshot unless one is already pending
    ///
    /// Returns `true` when a new snapshot was taken.
    pub fn ensure_backup(&self) -> bool {
        let mut log = self.log.lock();
        self.backup_locked(&mut log)
    }

    fn backup_locked(&self, log: &mut ChangeLog) -> bool {
        if log.backup.is_some() {
            return false;
        }

        let registry = self.registry.read();
        let calculated = self.calculated.read();
        log.backup = Some(Snapshot {
            registry: registry.clone(),
            calculated: calculated.clone(),
        });
        true
    }

    /// Apply a change and queue it for persistence
    pub fn change(&self, action: ChangeAction, actor: Actor, rights: Right) {
        let change = Change {
            action,
            actor,
            rights,
        };

        let mut log = self.log.lock();
        self.backup_locked(&mut log);

        {
            let mut registry = self.registry.write();
            registry.apply(&change);
            self.calculated.write().remove(&actor);
        }

        debug!(
            "Roster {} queued {:?} {} {}",
            self.policy_id, action, actor, rights
        );
        log.pending.push(change);
    }

    /// Roll back to the snapshot and drop pending changes
    ///
    /// Returns `true` when a snapshot was restored.
    pub fn restore_backup(&self) -> bool {
        let mut log = self.log.lock();
        log.pending.clear();

        let Some(snapshot) = log.backup.take() else {
            return false;
        };

        let mut registry = self.registry.write();
        let mut calculated = self.calculated.write();
        *registry = snapshot.registry;
        *calculated = snapshot.calculated;
        true
    }

    /// Drop snapshot and pending changes after a successful persist
    pub fn commit(&self) {
        let mut log = self.log.lock();
        log.pending.clear();
        log.backup = None;
    }

    /// Changes queued since the last commit
    pub fn pending(&self) -> Vec<Change> {
        self.log.lock().pending.clone()
    }

    /// Whether anything is queued
    pub fn has_pending(&self) -> bool {
        !self.log.lock().pending.is_empty()
    }

    /// Whether a snapshot is held
    pub fn has_backup(&self) -> bool {
        self.log.lock().backup.is_some()
    }

    /// Forget every calculated entry
    pub fn invalidate_cache(&self) {
        self.calculated.write().clear();
    }
}
