mod common;

use std::time::Duration;

use common::TestEngine;
use taskforge::store::OpContext;
use taskforge::types::Grant;

#[tokio::test]
async fn user_without_roles_has_no_permissions() {
    let t = TestEngine::start();
    let user = t.user("norole@example.com");

    let permissions = t.engine.resolve_permissions(&user.id).await.unwrap();
    assert!(permissions.is_empty());

    for (resource, action) in [("task", "create"), ("task", "update"), ("comment", "create")] {
        assert!(!t.engine.authorize(&user.id, resource, action).await.unwrap());
    }
}

#[tokio::test]
async fn unknown_user_resolves_to_empty_set() {
    let t = TestEngine::start();
    let permissions = t.engine.resolve_permissions("missing-user").await.unwrap();
    assert!(permissions.is_empty());
    assert!(!t.engine.authorize("missing-user", "task", "create").await.unwrap());
}

#[tokio::test]
async fn granting_and_revoking_a_role_toggles_authorization() {
    let t = TestEngine::start();
    let user = t.user("toggle@example.com");
    assert!(!t.engine.authorize(&user.id, "task", "create").await.unwrap());

    let role = t.grant_role(&user.id, "creator", &[("task", "create")]).await;
    assert!(t.engine.authorize(&user.id, "task", "create").await.unwrap());

    let removed = t
        .engine
        .admin()
        .revoke_role(&user.id, &role.id, OpContext::new())
        .await
        .unwrap();
    assert!(removed);
    assert!(!t.engine.authorize(&user.id, "task", "create").await.unwrap());
}

#[tokio::test]
async fn revoking_a_permission_from_a_role_invalidates_holders() {
    let t = TestEngine::start();
    let alice = t.user("alice@example.com");
    let bob = t.user("bob@example.com");
    let role = t.grant_role(&alice.id, "editors", &[("task", "update")]).await;
    t.engine
        .admin()
        .assign_role(&bob.id, &role.id, OpContext::new())
        .await
        .unwrap();

    assert!(t.engine.authorize(&alice.id, "task", "update").await.unwrap());
    assert!(t.engine.authorize(&bob.id, "task", "update").await.unwrap());

    let permission = t
        .engine
        .admin()
        .ensure_permission("task", "update", OpContext::new())
        .await
        .unwrap();
    t.engine
        .admin()
        .revoke_permission(&role.id, &permission.id, OpContext::new())
        .await
        .unwrap();

    assert!(!t.engine.authorize(&alice.id, "task", "update").await.unwrap());
    assert!(!t.engine.authorize(&bob.id, "task", "update").await.unwrap());
}

#[tokio::test]
async fn permissions_are_the_union_across_roles() {
    let t = TestEngine::start();
    let user = t.user("union@example.com");
    t.grant_role(&user.id, "writers", &[("task", "create"), ("comment", "create")])
        .await;
    t.grant_role(&user.id, "moderators", &[("comment", "create"), ("comment", "delete")])
        .await;

    let permissions = t.engine.resolve_permissions(&user.id).await.unwrap();
    let expected = [
        Grant::new("comment", "create"),
        Grant::new("comment", "delete"),
        Grant::new("task", "create"),
    ];
    assert_eq!(permissions.len(), expected.len());
    for grant in &expected {
        assert!(permissions.has(&grant.resource, &grant.action), "missing {grant}");
    }
}

#[tokio::test]
async fn matching_is_exact() {
    let t = TestEngine::start();
    let user = t.user("exact@example.com");
    t.grant_role(&user.id, "updaters", &[("task", "update")]).await;

    assert!(t.engine.authorize(&user.id, "task", "update").await.unwrap());
    assert!(!t.engine.authorize(&user.id, "task", "create").await.unwrap());
    assert!(!t.engine.authorize(&user.id, "comment", "update").await.unwrap());
    assert!(!t.engine.authorize(&user.id, "task", "*").await.unwrap());
}

#[tokio::test]
async fn disabled_cache_sees_direct_store_writes() {
    let t = TestEngine::uncached();
    let user = t.user("direct@example.com");
    let role = t.grant_role(&user.id, "direct", &[("task", "delete")]).await;
    assert!(t.engine.authorize(&user.id, "task", "delete").await.unwrap());

    t.store()
        .transaction(&Default::default(), |repo| repo.delete_user_role(&user.id, &role.id))
        .unwrap();
    assert!(!t.engine.authorize(&user.id, "task", "delete").await.unwrap());
}

#[tokio::test]
async fn cache_ttl_bounds_staleness_of_direct_writes() {
    let t = TestEngine::start_with(|config| config.cache.ttl_ms = 50);
    let user = t.user("ttl@example.com");
    let role = t.grant_role(&user.id, "short-lived", &[("task", "create")]).await;
    assert!(t.engine.authorize(&user.id, "task", "create").await.unwrap());

    t.store()
        .transaction(&Default::default(), |repo| repo.delete_user_role(&user.id, &role.id))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!t.engine.authorize(&user.id, "task", "create").await.unwrap());
}

#[tokio::test]
async fn expired_context_fails_as_store_unavailable() {
    let t = TestEngine::start();
    let user = t.user("late@example.com");

    let context = OpContext::new().with_timeout(Duration::ZERO);
    let err = t
        .engine
        .authorize_with(&user.id, "task", "create", context)
        .await
        .unwrap_err();
    assert!(err.is_retryable());
}
