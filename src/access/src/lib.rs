//! # CretoAI Access Rights Engine
//!
//! Hierarchical access-rights resolution over policies, rosters and groups.
//!
//! ## Features
//!
//! - **Policy tree** with inherit (defer to parent) and extend (add to parent)
//! - **Rosters** of per-actor rights with lazy backup, commit and restore
//! - **Group tree** of roles and groups; nearest ancestor's entry wins
//! - **Async-first design** using Tokio and pluggable `async_trait` stores
//! - **Generation-stamped caching** of resolved rights
//!
//! ## Example
//!
//! ```rust
//! use cretoai_access::{AccessManager, Actor, GroupManager, ManagerConfig, MemoryStore, PolicyFlags, Right};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryStore::new());
//!     let config = ManagerConfig::default();
//!     let groups = Arc::new(GroupManager::open(store.clone()).await?);
//!     let access = AccessManager::new(store, groups, config);
//!
//!     let owner = Actor::user(1);
//!     let policy = access.create(Some("doc1"), 1, 0, None, PolicyFlags::empty()).await?;
//!     access.grant_user_access(policy.id, &owner, 7, Right::VIEW).await?;
//!     access.update(policy.clone()).await?;
//!
//!     if access.user_has_access(policy.id, 7, Right::VIEW).await? {
//!         println!("Access granted!");
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod group;
pub mod manager;
pub mod policy;
pub mod right;
pub mod roster;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use cache::{CacheStats, Generation, RightsCache};
pub use config::{CacheConfig, ManagerConfig};
pub use error::{AccessError, Result, StoreError, StoreResult};
pub use group::{Group, GroupFlags, GroupKind, GroupManager, Relation};
pub use manager::AccessManager;
pub use policy::{Policy, PolicyFlags, PolicyObject};
pub use right::Right;
pub use roster::{Cell, Change, ChangeAction, Roster, RosterRecord, RosterUpdate};
pub use store::{GroupStore, MemoryStore, PolicyStore};
pub use types::{Actor, ActorKind, Asset, GroupId, PolicyId, UserId};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
