//! Permission cache integration tests over a real Redis
//!
//! Tests skip when Redis is unreachable.

use std::sync::Arc;
use std::time::Duration;

use redis::AsyncCommands;
use uuid::Uuid;
use verdict_core::cache::PermissionCache;
use verdict_core::config::CacheConfig;
use verdict_core::domain::RequestContext;
use verdict_core::repository::RbacRepository;
use verdict_core::service::AuthorizationService;

mod common;

macro_rules! test_redis_or_skip {
    () => {
        match common::get_test_redis().await {
            Ok(conn) => conn,
            Err(e) => {
                eprintln!("Skipping test: could not connect to Redis: {}", e);
                return;
            }
        }
    };
}

fn perms(keys: &[&str]) -> Vec<String> {
    keys.iter().map(|k| k.to_string()).collect()
}

#[tokio::test]
async fn test_set_get_and_user_invalidation() {
    let conn = test_redis_or_skip!();
    let cache = PermissionCache::with_manager(conn, CacheConfig::default());

    let tenant_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();
    let role_id = Uuid::new_v4();

    assert_eq!(cache.get(tenant_id, user_id).await, None);

    cache
        .set(tenant_id, user_id, &perms(&["users:read", "roles:read"]), &[role_id])
        .await;
    assert_eq!(
        cache.get(tenant_id, user_id).await,
        Some(perms(&["users:read", "roles:read"]))
    );

    cache.invalidate_for_user(tenant_id, user_id).await;
    assert_eq!(cache.get(tenant_id, user_id).await, None);
}

#[tokio::test]
async fn test_cached_entry_carries_a_bounded_ttl() {
    let mut conn = test_redis_or_skip!();
    let config = CacheConfig::default();
    let cache = PermissionCache::with_manager(conn.clone(), config.clone());

    let tenant_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();
    cache.set(tenant_id, user_id, &perms(&["users:read"]), &[]).await;

    let key = format!("verdict:perms:{}:{}", tenant_id, user_id);
    let ttl: i64 = conn.ttl(&key).await.unwrap();
    assert!(ttl >= 1, "entry must expire");
    assert!(
        ttl <= (config.base_ttl_secs + config.ttl_jitter_secs) as i64,
        "ttl {} exceeds jitter ceiling",
        ttl
    );
}

#[tokio::test]
async fn test_role_invalidation_drops_indexed_users_only() {
    let conn = test_redis_or_skip!();
    let cache = PermissionCache::with_manager(conn, CacheConfig::default());

    let tenant_id = Uuid::new_v4();
    let editor_role = Uuid::new_v4();
    let viewer_role = Uuid::new_v4();
    let editor_user = Uuid::new_v4();
    let viewer_user = Uuid::new_v4();

    cache
        .set(tenant_id, editor_user, &perms(&["docs:write"]), &[editor_role])
        .await;
    cache
        .set(tenant_id, viewer_user, &perms(&["docs:read"]), &[viewer_role])
        .await;

    cache.invalidate_for_role(tenant_id, editor_role).await;

    assert_eq!(cache.get(tenant_id, editor_user).await, None);
    assert_eq!(
        cache.get(tenant_id, viewer_user).await,
        Some(perms(&["docs:read"]))
    );
}

#[tokio::test]
async fn test_invalidating_an_unindexed_role_touches_only_its_index() {
    let mut conn = test_redis_or_skip!();
    let cache = PermissionCache::with_manager(conn.clone(), CacheConfig::default());

    let tenant_id = Uuid::new_v4();
    let bystander = Uuid::new_v4();
    let indexed_role = Uuid::new_v4();
    let empty_role = Uuid::new_v4();

    cache
        .set(tenant_id, bystander, &perms(&["docs:read"]), &[indexed_role])
        .await;

    cache.invalidate_for_role(tenant_id, empty_role).await;

    // With no indexed users there is nothing to delete but the (absent)
    // index itself: cached entries and unrelated role indexes survive.
    assert_eq!(
        cache.get(tenant_id, bystander).await,
        Some(perms(&["docs:read"]))
    );
    let indexed_key = format!("verdict:role_users:{}:{}", tenant_id, indexed_role);
    let survives: bool = conn.exists(&indexed_key).await.unwrap();
    assert!(survives, "unrelated role index must survive");

    let empty_key = format!("verdict:role_users:{}:{}", tenant_id, empty_role);
    let lingers: bool = conn.exists(&empty_key).await.unwrap();
    assert!(!lingers, "the invalidated role's index must not exist");
}

#[tokio::test]
async fn test_debounced_role_invalidation_fires_after_window() {
    let conn = test_redis_or_skip!();
    let config = CacheConfig {
        debounce_ms: 100,
        ..Default::default()
    };
    let cache = PermissionCache::with_manager(conn, config);

    let tenant_id = Uuid::new_v4();
    let role_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();

    cache
        .set(tenant_id, user_id, &perms(&["docs:write"]), &[role_id])
        .await;

    for _ in 0..5 {
        cache.invalidate_for_role_debounced(tenant_id, role_id);
    }

    // Still cached inside the window.
    assert!(cache.get(tenant_id, user_id).await.is_some());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(cache.get(tenant_id, user_id).await, None);
}

#[tokio::test]
async fn test_tenant_invalidation_is_scoped() {
    let conn = test_redis_or_skip!();
    let cache = PermissionCache::with_manager(conn, CacheConfig::default());

    let tenant_a = Uuid::new_v4();
    let tenant_b = Uuid::new_v4();
    let users: Vec<Uuid> = (0..10).map(|_| Uuid::new_v4()).collect();

    for user in &users {
        cache.set(tenant_a, *user, &perms(&["users:read"]), &[]).await;
        cache.set(tenant_b, *user, &perms(&["users:read"]), &[]).await;
    }

    cache.invalidate_for_tenant(tenant_a).await;

    for user in &users {
        assert_eq!(cache.get(tenant_a, *user).await, None);
        assert!(cache.get(tenant_b, *user).await.is_some());
    }
}

#[tokio::test]
async fn test_corrupt_entry_is_evicted_and_treated_as_miss() {
    let mut conn = test_redis_or_skip!();
    let cache = PermissionCache::with_manager(conn.clone(), CacheConfig::default());

    let tenant_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();
    let key = format!("verdict:perms:{}:{}", tenant_id, user_id);

    let _: () = conn.set(&key, "{not json").await.unwrap();

    assert_eq!(cache.get(tenant_id, user_id).await, None);
    let exists: bool = conn.exists(&key).await.unwrap();
    assert!(!exists, "corrupt entry must be evicted");
}

#[tokio::test]
async fn test_authorization_repopulates_cache_and_serves_from_it() {
    use verdict_core::repository::RbacRepositoryImpl;
    use verdict_core::service::{PermissionRegistry, RoleService};

    let conn = test_redis_or_skip!();
    let pool = match common::get_test_pool().await {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("Skipping test: could not connect to database: {}", e);
            return;
        }
    };

    let schema = common::unique_schema();
    common::provision_schema(&pool, &schema).await.unwrap();

    let cache = PermissionCache::with_manager(conn, CacheConfig::default());
    let tenant_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();

    let repo = Arc::new(RbacRepositoryImpl::new(pool.clone()));
    let registry = PermissionRegistry::new(Arc::clone(&repo), Some(cache.clone()));
    let roles = RoleService::new(Arc::clone(&repo), Some(cache.clone()));
    let service = AuthorizationService::new(Arc::clone(&repo), Some(cache.clone()));

    registry.register_core_permissions(&schema, tenant_id).await.unwrap();
    let tenant_admin = repo
        .find_role_by_name(&schema, tenant_id, "tenant_admin")
        .await
        .unwrap()
        .unwrap();
    roles
        .assign_role_to_user(&schema, tenant_id, user_id, *tenant_admin.id)
        .await
        .unwrap();

    let ctx = RequestContext::new(user_id, tenant_id, schema.clone());

    // First decision falls through to the store and repopulates the cache;
    // the second is answered from the cache.
    let first = service.authorize(&ctx, &["users:read".to_string()]).await;
    assert!(first.permitted);
    assert!(!first.from_cache);

    let second = service.authorize(&ctx, &["users:read".to_string()]).await;
    assert!(second.permitted);
    assert!(second.from_cache);

    // Unassigning invalidates the user's entry, so the next decision goes
    // back to the store and comes up denied.
    roles
        .remove_role_from_user(&schema, tenant_id, user_id, *tenant_admin.id)
        .await
        .unwrap();
    let third = service.authorize(&ctx, &["users:read".to_string()]).await;
    assert!(!third.permitted);
    assert!(!third.from_cache);

    common::drop_schema(&pool, &schema).await.unwrap();
}
