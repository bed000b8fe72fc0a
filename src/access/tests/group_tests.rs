//! Group hierarchy integration tests
//!
//! Nearest-ancestor resolution through the group tree and cache
//! invalidation on membership and hierarchy changes.

mod common;

use common::{contended, fixture, OWNER};
use cretoai_access::{
    AccessError, AccessManager, Actor, Group, GroupFlags, GroupManager, GroupStore, ManagerConfig,
    PolicyFlags, Right,
};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// NEAREST ANCESTOR TESTS
// ============================================================================

#[tokio::test]
async fn test_nearest_ancestor_wins() {
    let f = fixture().await;
    let owner = Actor::user(OWNER);

    let g1 = f.groups.create(GroupFlags::GROUP, 0, "g1", "Company").await.unwrap();
    let g2 = f.groups.create(GroupFlags::GROUP, g1.id, "g2", "Engineering").await.unwrap();
    let g3 = f.groups.create(GroupFlags::GROUP, g2.id, "g3", "Platform").await.unwrap();

    let policy = f
        .access
        .create(Some("doc1"), OWNER, 0, None, PolicyFlags::empty())
        .await
        .unwrap();

    f.access
        .grant_group_access(policy.id, &owner, g1.id, Right::VIEW)
        .await
        .unwrap();
    assert_eq!(f.access.group_access(policy.id, g3.id).await.unwrap(), Right::VIEW);

    f.access
        .grant_group_access(policy.id, &owner, g2.id, Right::VIEW | Right::CHANGE)
        .await
        .unwrap();
    assert_eq!(
        f.access.group_access(policy.id, g3.id).await.unwrap(),
        Right::VIEW | Right::CHANGE
    );
    assert_eq!(f.access.group_access(policy.id, g1.id).await.unwrap(), Right::VIEW);

    // An explicit empty entry still shadows the ancestors
    f.access
        .grant_group_access(policy.id, &owner, g3.id, Right::NONE)
        .await
        .unwrap();
    assert_eq!(f.access.group_access(policy.id, g3.id).await.unwrap(), Right::NONE);
    assert!(!f.access.group_has_access(policy.id, g3.id, Right::VIEW).await.unwrap());
}

#[tokio::test]
async fn test_user_collects_every_membership() {
    let f = fixture().await;
    let owner = Actor::user(OWNER);
    let user = Actor::user(7);

    let eng = f.groups.create(GroupFlags::GROUP, 0, "eng", "Engineering").await.unwrap();
    let admin = f.groups.create(GroupFlags::ROLE, 0, "admin", "Admins").await.unwrap();
    f.groups.create_relation(eng.id, user).await.unwrap();
    f.groups.create_relation(admin.id, user).await.unwrap();

    let policy = f
        .access
        .create(Some("doc1"), OWNER, 0, None, PolicyFlags::empty())
        .await
        .unwrap();
    f.access.grant_public_access(policy.id, &owner, Right::VIEW).await.unwrap();
    f.access
        .grant_group_access(policy.id, &owner, eng.id, Right::CHANGE)
        .await
        .unwrap();
    f.access
        .grant_role_access(policy.id, &owner, admin.id, Right::DELETE)
        .await
        .unwrap();
    f.access
        .grant_user_access(policy.id, &owner, 7, Right::COPY)
        .await
        .unwrap();

    assert_eq!(
        f.access.summarized_user_access(policy.id, 7).await.unwrap(),
        Right::VIEW | Right::CHANGE | Right::DELETE | Right::COPY
    );
    assert_eq!(
        f.access.effective_access(policy.id, &Actor::group(eng.id)).await.unwrap(),
        Right::VIEW | Right::CHANGE
    );
}

#[tokio::test]
async fn test_self_parent_rejected() {
    let f = fixture().await;
    let eng = f.groups.create(GroupFlags::GROUP, 0, "eng", "Engineering").await.unwrap();

    assert!(matches!(
        f.groups.set_parent(eng.id, eng.id).await,
        Err(AccessError::CircularGroup(_))
    ));
    assert!(!f.groups.is_circuited(eng.id).await.unwrap());
}

#[tokio::test]
async fn test_mixed_kinds_rejected() {
    let f = fixture().await;
    let eng = f.groups.create(GroupFlags::GROUP, 0, "eng", "Engineering").await.unwrap();

    let role = f.groups.create(GroupFlags::ROLE, eng.id, "lead", "Leads").await;
    assert!(matches!(role, Err(AccessError::GroupKindMismatch(_))));
}

// ============================================================================
// INVALIDATION TESTS
// ============================================================================

#[tokio::test]
async fn test_membership_change_invalidates_resolution() {
    let f = fixture().await;
    let owner = Actor::user(OWNER);
    let eng = f.groups.create(GroupFlags::GROUP, 0, "eng", "Engineering").await.unwrap();

    let policy = f
        .access
        .create(Some("doc1"), OWNER, 0, None, PolicyFlags::empty())
        .await
        .unwrap();
    f.access
        .grant_group_access(policy.id, &owner, eng.id, Right::VIEW)
        .await
        .unwrap();

    assert!(!f.access.user_has_access(policy.id, 7, Right::VIEW).await.unwrap());

    f.groups.create_relation(eng.id, Actor::user(7)).await.unwrap();
    assert!(f.access.user_has_access(policy.id, 7, Right::VIEW).await.unwrap());
    assert!(f.access.user_has_access(policy.id, 7, Right::VIEW).await.unwrap());

    f.groups.delete_relation(eng.id, Actor::user(7)).await.unwrap();
    assert!(!f.access.user_has_access(policy.id, 7, Right::VIEW).await.unwrap());

    let stats = f.access.cache_stats().unwrap();
    assert!(stats.hits >= 1);
    assert!(stats.stale >= 1);
}

#[tokio::test]
async fn test_reparent_invalidates_resolution() {
    let f = fixture().await;
    let owner = Actor::user(OWNER);

    let company = f.groups.create(GroupFlags::GROUP, 0, "company", "Company").await.unwrap();
    let team = f.groups.create(GroupFlags::GROUP, company.id, "team", "Team").await.unwrap();
    f.groups.create_relation(team.id, Actor::user(7)).await.unwrap();

    let policy = f
        .access
        .create(Some("doc1"), OWNER, 0, None, PolicyFlags::empty())
        .await
        .unwrap();
    f.access
        .grant_group_access(policy.id, &owner, company.id, Right::VIEW)
        .await
        .unwrap();
    assert!(f.access.user_has_access(policy.id, 7, Right::VIEW).await.unwrap());

    f.groups.set_parent(team.id, 0).await.unwrap();
    assert!(!f.access.user_has_access(policy.id, 7, Right::VIEW).await.unwrap());

    f.groups.set_parent(team.id, company.id).await.unwrap();
    assert!(f.access.user_has_access(policy.id, 7, Right::VIEW).await.unwrap());
}

#[tokio::test]
async fn test_uncached_manager_resolves_the_same() {
    let f = common::fixture_with(ManagerConfig::default().without_cache()).await;
    let owner = Actor::user(OWNER);
    let eng = f.groups.create(GroupFlags::GROUP, 0, "eng", "Engineering").await.unwrap();
    f.groups.create_relation(eng.id, Actor::user(7)).await.unwrap();

    let policy = f
        .access
        .create(Some("doc1"), OWNER, 0, None, PolicyFlags::empty())
        .await
        .unwrap();
    f.access
        .grant_group_access(policy.id, &owner, eng.id, Right::VIEW)
        .await
        .unwrap();

    assert!(f.access.user_has_access(policy.id, 7, Right::VIEW).await.unwrap());
    assert!(f.access.cache_stats().is_none());
}

#[tokio::test]
async fn test_default_groups_assigned() {
    let f = fixture().await;
    let owner = Actor::user(OWNER);
    let everyone = f
        .groups
        .create(GroupFlags::GROUP | GroupFlags::DEFAULT, 0, "staff", "Staff")
        .await
        .unwrap();

    let policy = f
        .access
        .create(Some("doc1"), OWNER, 0, None, PolicyFlags::empty())
        .await
        .unwrap();
    f.access
        .grant_group_access(policy.id, &owner, everyone.id, Right::VIEW)
        .await
        .unwrap();

    let joined = f.groups.assign_default_groups(Actor::user(7)).await.unwrap();
    assert_eq!(joined, vec![everyone.id]);
    assert!(f.access.user_has_access(policy.id, 7, Right::VIEW).await.unwrap());

    let again = f.groups.assign_default_groups(Actor::user(7)).await.unwrap();
    assert!(again.is_empty());
}

// ============================================================================
// SHARED STORE TESTS
// ============================================================================

#[tokio::test]
async fn test_reopened_manager_sees_stored_memberships() {
    let f = fixture().await;
    let eng = f.groups.create(GroupFlags::GROUP, 0, "eng", "Engineering").await.unwrap();
    f.groups.create_relation(eng.id, Actor::user(7)).await.unwrap();

    let groups = Arc::new(GroupManager::open(f.store.clone()).await.unwrap());
    let access = AccessManager::new(f.store.clone(), groups.clone(), ManagerConfig::default());
    let policy = access
        .create(Some("doc1"), OWNER, 0, None, PolicyFlags::empty())
        .await
        .unwrap();
    access
        .grant_group_access(policy.id, &Actor::user(OWNER), eng.id, Right::VIEW)
        .await
        .unwrap();

    assert!(groups.is_member(eng.id, &Actor::user(7)));
    assert!(access.user_has_access(policy.id, 7, Right::VIEW).await.unwrap());
}

#[tokio::test]
async fn test_delete_refuses_children_written_elsewhere() {
    let f = fixture().await;
    let eng = f.groups.create(GroupFlags::GROUP, 0, "eng", "Engineering").await.unwrap();

    // Another process adds a child behind this manager's back
    let child = Group::new(GroupFlags::GROUP, eng.id, "web", "Web").unwrap();
    f.store.upsert_group(child).await.unwrap();

    assert!(matches!(
        f.groups.delete(eng.id).await,
        Err(AccessError::GroupHasChildren(_))
    ));
    assert!(f.groups.group_by_id(eng.id).await.is_ok());
}

#[tokio::test]
async fn test_update_conflict_names_requested_key() {
    let (store, groups, _access) = contended(Duration::ZERO).await;
    let eng = groups.create(GroupFlags::GROUP, 0, "eng", "Engineering").await.unwrap();

    let mut renamed = eng.clone();
    renamed.key = "platform".to_string();
    store.arm_rival();

    match groups.update(renamed).await {
        Err(AccessError::GroupKeyTaken(key)) => assert_eq!(key, "platform"),
        other => panic!("expected GroupKeyTaken, got {:?}", other),
    }
    assert_eq!(groups.group_by_id(eng.id).await.unwrap().key, "eng");
}
