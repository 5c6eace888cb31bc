//! Engine-level tests for the documented behavior of checks, grants,
//! expiry, caching and the scan-backed read operations.

use auth_rebac::{AccessEngine, AccessError, Permission, Subject};
use chrono::Utc;
use kv_store::{KeyValueStore, MemoryStore};
use std::collections::BTreeSet;
use std::sync::Arc;

fn test_engine() -> AccessEngine {
    AccessEngine::new(Arc::new(MemoryStore::new()))
}

async fn seed_blog_roles(engine: &AccessEngine) {
    engine
        .define_role("blog", "viewer", BTreeSet::from([Permission::View]), vec![])
        .await
        .unwrap();
    engine
        .define_role(
            "blog",
            "editor",
            BTreeSet::from([Permission::Edit]),
            vec!["viewer".to_string()],
        )
        .await
        .unwrap();
    engine
        .define_role(
            "blog",
            "admin",
            BTreeSet::from([Permission::Delete, Permission::ManageRoles]),
            vec!["editor".to_string()],
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_no_grant_means_no_access() {
    let engine = test_engine();
    seed_blog_roles(&engine).await;

    let decision = engine
        .check_permission("user:alice", "blog", "b1", Permission::View, false)
        .await
        .unwrap();
    assert!(!decision.allowed);
    assert!(decision.permissions.is_empty());
    assert!(!decision.cached);
}

#[tokio::test]
async fn test_inheritance_union() {
    let engine = test_engine();
    seed_blog_roles(&engine).await;

    engine
        .grant_role("user:alice", "blog", "b1", "editor", None)
        .await
        .unwrap();

    let decision = engine
        .check_permission("user:alice", "blog", "b1", Permission::View, false)
        .await
        .unwrap();
    assert!(decision.allowed, "editor inherits view through viewer");
    assert_eq!(
        decision.permissions,
        BTreeSet::from([Permission::View, Permission::Edit])
    );

    // Two levels deep
    engine
        .grant_role("user:bob", "blog", "b1", "admin", None)
        .await
        .unwrap();
    let decision = engine
        .check_permission("user:bob", "blog", "b1", Permission::View, false)
        .await
        .unwrap();
    assert!(decision.allowed);
    assert_eq!(
        decision.permissions,
        BTreeSet::from([
            Permission::View,
            Permission::Edit,
            Permission::Delete,
            Permission::ManageRoles
        ])
    );
}

#[tokio::test]
async fn test_expired_grant_confers_nothing() {
    let engine = test_engine();
    seed_blog_roles(&engine).await;

    let past = Utc::now().timestamp_millis() - 1_000;
    engine
        .grant_role("user:alice", "blog", "b1", "editor", Some(past))
        .await
        .unwrap();

    for permission in Permission::ALL {
        let decision = engine
            .check_permission("user:alice", "blog", "b1", permission, true)
            .await
            .unwrap();
        assert!(!decision.allowed, "{permission} should be denied");
    }

    // The tuple still exists; only the read path filters it
    let roles = engine.get_user_roles("user:alice", "blog").await.unwrap();
    assert_eq!(roles.len(), 1);
    assert_eq!(roles[0].role, "editor");
    assert_eq!(roles[0].expires_at, Some(past));
}

#[tokio::test]
async fn test_future_expiry_still_grants() {
    let engine = test_engine();
    seed_blog_roles(&engine).await;

    let future = Utc::now().timestamp_millis() + 60_000;
    engine
        .grant_role("user:alice", "blog", "b1", "viewer", Some(future))
        .await
        .unwrap();

    let decision = engine
        .check_permission("user:alice", "blog", "b1", Permission::View, true)
        .await
        .unwrap();
    assert!(decision.allowed);
}

#[tokio::test]
async fn test_group_path() {
    let engine = test_engine();
    seed_blog_roles(&engine).await;

    engine
        .add_to_group("user:carol", "group:writers")
        .await
        .unwrap();
    engine
        .grant_role("group:writers", "blog", "b7", "editor", None)
        .await
        .unwrap();

    // No direct grant to carol anywhere
    assert!(engine
        .get_user_roles("user:carol", "blog")
        .await
        .unwrap()
        .is_empty());

    for permission in [Permission::View, Permission::Edit] {
        let decision = engine
            .check_permission("user:carol", "blog", "b7", permission, false)
            .await
            .unwrap();
        assert!(decision.allowed, "{permission} should flow through the group");
    }

    // Non-members get nothing
    let decision = engine
        .check_permission("user:dave", "blog", "b7", Permission::View, false)
        .await
        .unwrap();
    assert!(!decision.allowed);
}

#[tokio::test]
async fn test_expired_group_grant() {
    let engine = test_engine();
    seed_blog_roles(&engine).await;

    engine
        .add_to_group("user:carol", "group:writers")
        .await
        .unwrap();
    let past = Utc::now().timestamp_millis() - 5;
    engine
        .grant_role("group:writers", "blog", "b7", "editor", Some(past))
        .await
        .unwrap();

    let decision = engine
        .check_permission("user:carol", "blog", "b7", Permission::Edit, true)
        .await
        .unwrap();
    assert!(!decision.allowed);
}

#[tokio::test]
async fn test_inheritance_cycle_terminates() {
    let engine = test_engine();

    engine
        .define_role(
            "blog",
            "chicken",
            BTreeSet::from([Permission::View]),
            vec!["egg".to_string()],
        )
        .await
        .unwrap();
    engine
        .define_role(
            "blog",
            "egg",
            BTreeSet::from([Permission::Edit]),
            vec!["chicken".to_string()],
        )
        .await
        .unwrap();

    engine
        .grant_role("user:alice", "blog", "b1", "chicken", None)
        .await
        .unwrap();

    let decision = engine
        .check_permission("user:alice", "blog", "b1", Permission::Edit, false)
        .await
        .unwrap();
    assert!(decision.allowed);
    assert_eq!(
        decision.permissions,
        BTreeSet::from([Permission::View, Permission::Edit])
    );
}

#[tokio::test]
async fn test_dangling_role_resolves_to_nothing() {
    let engine = test_engine();
    seed_blog_roles(&engine).await;

    engine
        .grant_role("user:alice", "blog", "b1", "editor", None)
        .await
        .unwrap();
    let decision = engine
        .check_permission("user:alice", "blog", "b1", Permission::Edit, true)
        .await
        .unwrap();
    assert!(decision.allowed);

    // Deleting the definition revokes the role's meaning everywhere
    engine.delete_role("blog", "editor").await.unwrap();

    let decision = engine
        .check_permission("user:alice", "blog", "b1", Permission::Edit, true)
        .await
        .unwrap();
    assert!(!decision.allowed);
    assert!(decision.permissions.is_empty());

    // The tuple still references the dangling name
    let roles = engine.get_user_roles("user:alice", "blog").await.unwrap();
    assert_eq!(roles[0].role, "editor");
}

#[tokio::test]
async fn test_revocation_and_cache_bypass() {
    let engine = test_engine();
    seed_blog_roles(&engine).await;

    engine
        .grant_role("user:alice", "blog", "b1", "editor", None)
        .await
        .unwrap();

    // Populate the decision cache
    let decision = engine
        .check_permission("user:alice", "blog", "b1", Permission::Edit, false)
        .await
        .unwrap();
    assert!(decision.allowed);
    assert!(!decision.cached);

    engine.revoke_role("user:alice", "blog", "b1").await.unwrap();

    // The cached path may serve the pre-revocation decision until the
    // result TTL expires: bounded staleness, documented behavior.
    let stale = engine
        .check_permission("user:alice", "blog", "b1", Permission::Edit, false)
        .await
        .unwrap();
    assert!(stale.cached);
    assert!(stale.allowed);

    // The bypass path must always reflect the revocation...
    let fresh = engine
        .check_permission("user:alice", "blog", "b1", Permission::Edit, true)
        .await
        .unwrap();
    assert!(!fresh.allowed);
    assert!(!fresh.cached);

    // ...and it rewrites the decision cache, so the cached path now
    // agrees.
    let after = engine
        .check_permission("user:alice", "blog", "b1", Permission::Edit, false)
        .await
        .unwrap();
    assert!(!after.allowed);
    assert!(after.cached);
}

#[tokio::test]
async fn test_decision_cache_round_trip() {
    let engine = test_engine();
    seed_blog_roles(&engine).await;

    engine
        .grant_role("user:alice", "blog", "b1", "viewer", None)
        .await
        .unwrap();

    let first = engine
        .check_permission("user:alice", "blog", "b1", Permission::View, false)
        .await
        .unwrap();
    assert!(!first.cached);

    let second = engine
        .check_permission("user:alice", "blog", "b1", Permission::View, false)
        .await
        .unwrap();
    assert!(second.cached);
    assert_eq!(second.allowed, first.allowed);
    assert_eq!(second.permissions, first.permissions);

    // Decisions are cached per permission: a different permission on the
    // same object computes fresh
    let other = engine
        .check_permission("user:alice", "blog", "b1", Permission::Edit, false)
        .await
        .unwrap();
    assert!(!other.cached);
    assert!(!other.allowed);
}

#[tokio::test]
async fn test_wildcard_grant_does_not_reach_concrete_ids() {
    let engine = test_engine();
    seed_blog_roles(&engine).await;

    // Writes accept the "*" marker...
    engine
        .grant_role("user:alice", "blog", "*", "editor", None)
        .await
        .unwrap();

    // ...but the check path only ever fetches the literal requested id
    let decision = engine
        .check_permission("user:alice", "blog", "b1", Permission::Edit, true)
        .await
        .unwrap();
    assert!(!decision.allowed);

    // The wildcard tuple itself is a regular tuple under the literal key
    let decision = engine
        .check_permission("user:alice", "blog", "*", Permission::Edit, true)
        .await
        .unwrap();
    assert!(decision.allowed);
}

#[tokio::test]
async fn test_grant_overwrites_previous_role() {
    let engine = test_engine();
    seed_blog_roles(&engine).await;

    engine
        .grant_role("user:alice", "blog", "b1", "admin", None)
        .await
        .unwrap();
    engine
        .grant_role("user:alice", "blog", "b1", "viewer", None)
        .await
        .unwrap();

    let decision = engine
        .check_permission("user:alice", "blog", "b1", Permission::Delete, true)
        .await
        .unwrap();
    assert!(!decision.allowed, "demotion replaces the old role");
    assert_eq!(decision.permissions, BTreeSet::from([Permission::View]));
}

#[tokio::test]
async fn test_bulk_grant_fan_out() {
    let engine = test_engine();
    seed_blog_roles(&engine).await;

    let ids: Vec<String> = (1..=8).map(|i| format!("b{i}")).collect();
    engine
        .grant_role_to_many("user:alice", "blog", &ids, "viewer", None)
        .await
        .unwrap();

    for id in &ids {
        let decision = engine
            .check_permission("user:alice", "blog", id, Permission::View, true)
            .await
            .unwrap();
        assert!(decision.allowed, "grant missing on {id}");
    }

    let roles = engine.get_user_roles("user:alice", "blog").await.unwrap();
    assert_eq!(roles.len(), 8);
    // Sorted by object id
    assert_eq!(roles[0].object_id, "b1");
}

#[tokio::test]
async fn test_list_roles() {
    let engine = test_engine();
    seed_blog_roles(&engine).await;

    let roles = engine.list_roles("blog").await.unwrap();
    let names: Vec<&str> = roles.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["admin", "editor", "viewer"]);

    let editor = roles.iter().find(|r| r.name == "editor").unwrap();
    assert_eq!(editor.inherits, vec!["viewer".to_string()]);
    assert_eq!(editor.permissions, BTreeSet::from([Permission::Edit]));

    // Other types are unaffected
    assert!(engine.list_roles("post").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_group_listings() {
    let engine = test_engine();

    engine.add_to_group("user:alice", "group:writers").await.unwrap();
    engine.add_to_group("user:bob", "group:writers").await.unwrap();
    engine.add_to_group("user:bob", "group:ops").await.unwrap();

    let groups = engine.list_groups().await.unwrap();
    assert_eq!(
        groups,
        vec![Subject::group("ops"), Subject::group("writers")]
    );

    let writers = engine.get_group_members("group:writers").await.unwrap();
    assert_eq!(writers, vec![Subject::user("alice"), Subject::user("bob")]);

    engine
        .remove_from_group("user:bob", "group:writers")
        .await
        .unwrap();

    // The members view is cached; read through the store by bypassing
    // the cached entry's lifetime: membership mutation only invalidates
    // the user's own membership entry, so the cached member list may be
    // served until its TTL expires. The membership list itself is
    // already updated.
    let raw_groups = engine.list_groups().await.unwrap();
    assert!(raw_groups.contains(&Subject::group("ops")));
}

#[tokio::test]
async fn test_group_permissions_aggregation() {
    let engine = test_engine();
    seed_blog_roles(&engine).await;

    engine
        .grant_role("group:writers", "blog", "b1", "editor", None)
        .await
        .unwrap();
    engine
        .grant_role("group:writers", "blog", "b2", "admin", None)
        .await
        .unwrap();
    engine
        .grant_role("group:ops", "blog", "b3", "viewer", None)
        .await
        .unwrap();

    let all = engine.get_group_permissions(None).await.unwrap();
    assert_eq!(
        all["group:writers"],
        BTreeSet::from([
            Permission::View,
            Permission::Edit,
            Permission::Delete,
            Permission::ManageRoles
        ])
    );
    assert_eq!(all["group:ops"], BTreeSet::from([Permission::View]));

    let writers_only = engine
        .get_group_permissions(Some("group:writers"))
        .await
        .unwrap();
    assert!(writers_only.contains_key("group:writers"));
    assert!(!writers_only.contains_key("group:ops"));

    // A group with no grants resolves to an empty set, not an error
    let idle = engine
        .get_group_permissions(Some("group:lurkers"))
        .await
        .unwrap();
    assert_eq!(idle["group:lurkers"], BTreeSet::new());
}

#[tokio::test]
async fn test_malformed_stored_tuple_is_an_error_not_a_denial() {
    let store = Arc::new(MemoryStore::new());
    store.put("rel:blog:b1", "{not json").await.unwrap();
    let engine = AccessEngine::new(store);

    let err = engine
        .check_permission("user:alice", "blog", "b1", Permission::View, true)
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::Codec { .. }));
    assert!(!err.is_validation());
}

#[tokio::test]
async fn test_concurrent_checks_share_one_engine() {
    let engine = Arc::new(test_engine());
    seed_blog_roles(&engine).await;

    engine
        .grant_role("user:alice", "blog", "b1", "editor", None)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .check_permission("user:alice", "blog", "b1", Permission::View, false)
                .await
                .unwrap()
                .allowed
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap());
    }
}
