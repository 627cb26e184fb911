//! Redis cache layer for effective permission sets
//!
//! The cache is advisory: every operation is fail-open. An unreachable or
//! misbehaving Redis degrades reads to misses and writes/invalidations to
//! no-ops, because correctness belongs to the store alone. All errors are
//! logged at warn level and swallowed here; they never reach callers.

pub mod debounce;

use crate::config::{CacheConfig, RedisConfig};
use crate::error::{AppError, Result};
use debounce::Debouncer;
use rand::Rng;
use redis::{aio::ConnectionManager, AsyncCommands};
use std::time::Duration;
use uuid::Uuid;

/// Cache key prefixes
mod keys {
    /// Per-(tenant, user) effective permission set, JSON array of keys
    pub const USER_PERMS: &str = "verdict:perms";
    /// Per-(tenant, role) reverse index: set of user ids caching this role
    pub const ROLE_USERS: &str = "verdict:role_users";
}

fn user_key(tenant_id: Uuid, user_id: Uuid) -> String {
    format!("{}:{}:{}", keys::USER_PERMS, tenant_id, user_id)
}

fn role_index_key(tenant_id: Uuid, role_id: Uuid) -> String {
    format!("{}:{}:{}", keys::ROLE_USERS, tenant_id, role_id)
}

fn tenant_pattern(tenant_id: Uuid) -> String {
    format!("{}:{}:*", keys::USER_PERMS, tenant_id)
}

/// Compute a jittered TTL: `base ± uniform(0, jitter)`, floored at 1 second.
/// Spreading expiries avoids a synchronized stampede against the store.
pub fn jittered_ttl(base_secs: u64, jitter_secs: u64) -> u64 {
    let offset = if jitter_secs == 0 {
        0
    } else {
        rand::thread_rng().gen_range(-(jitter_secs as i64)..=(jitter_secs as i64))
    };
    (base_secs as i64 + offset).max(1) as u64
}

/// Cache manager for per-user effective permission sets
#[derive(Clone)]
pub struct PermissionCache {
    conn: ConnectionManager,
    config: CacheConfig,
    debouncer: Debouncer,
}

impl PermissionCache {
    /// Connect to Redis and create a new cache
    pub async fn new(redis: &RedisConfig, config: CacheConfig) -> Result<Self> {
        let client = redis::Client::open(redis.url.as_str()).map_err(|e| {
            AppError::Internal(anyhow::anyhow!("Failed to create Redis client: {}", e))
        })?;

        let conn = ConnectionManager::new(client).await.map_err(|e| {
            AppError::Internal(anyhow::anyhow!("Failed to connect to Redis: {}", e))
        })?;

        Ok(Self::with_manager(conn, config))
    }

    /// Build a cache over an existing connection manager
    pub fn with_manager(conn: ConnectionManager, config: CacheConfig) -> Self {
        let debouncer = Debouncer::new(Duration::from_millis(config.debounce_ms));
        Self {
            conn,
            config,
            debouncer,
        }
    }

    /// Get a user's cached effective permission set. Returns `None` on miss,
    /// on a value that fails to parse as a string array, and on any Redis
    /// error.
    pub async fn get(&self, tenant_id: Uuid, user_id: Uuid) -> Option<Vec<String>> {
        match self.try_get(tenant_id, user_id).await {
            Ok(Some(perms)) => {
                metrics::counter!("verdict_cache_hits_total").increment(1);
                Some(perms)
            }
            Ok(None) => {
                metrics::counter!("verdict_cache_misses_total").increment(1);
                None
            }
            Err(e) => {
                tracing::warn!(%tenant_id, %user_id, error = %e, "cache get failed, treating as miss");
                metrics::counter!("verdict_cache_errors_total", "op" => "get").increment(1);
                None
            }
        }
    }

    async fn try_get(&self, tenant_id: Uuid, user_id: Uuid) -> Result<Option<Vec<String>>> {
        let key = user_key(tenant_id, user_id);
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(&key).await?;

        let Some(raw) = value else {
            return Ok(None);
        };

        match serde_json::from_str::<Vec<String>>(&raw) {
            Ok(perms) => Ok(Some(perms)),
            Err(e) => {
                // A corrupt entry is a miss, not an error. Drop it so the
                // next set writes a clean value.
                tracing::warn!(%tenant_id, %user_id, error = %e, "unparsable cache entry, evicting");
                let _: std::result::Result<(), _> = conn.del(&key).await;
                Ok(None)
            }
        }
    }

    /// Cache a user's effective permission set and index the user under each
    /// role it flows from.
    pub async fn set(&self, tenant_id: Uuid, user_id: Uuid, perms: &[String], role_ids: &[Uuid]) {
        if let Err(e) = self.try_set(tenant_id, user_id, perms, role_ids).await {
            tracing::warn!(%tenant_id, %user_id, error = %e, "cache set failed, skipping");
            metrics::counter!("verdict_cache_errors_total", "op" => "set").increment(1);
        }
    }

    async fn try_set(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        perms: &[String],
        role_ids: &[Uuid],
    ) -> Result<()> {
        let key = user_key(tenant_id, user_id);
        let serialized = serde_json::to_string(perms)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("cache serialize error: {}", e)))?;

        let ttl = jittered_ttl(self.config.base_ttl_secs, self.config.ttl_jitter_secs);
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(&key, serialized, ttl).await?;
        self.ensure_expiry(&mut conn, &key).await?;

        for role_id in role_ids {
            let index_key = role_index_key(tenant_id, *role_id);
            let _: () = conn.sadd(&index_key, user_id.to_string()).await?;
            self.ensure_expiry(&mut conn, &index_key).await?;
        }

        Ok(())
    }

    /// Attach the safety TTL if the key reports no expiry. Guards against a
    /// write path that silently failed to set one: no entry may ever be
    /// permanently stale.
    async fn ensure_expiry(&self, conn: &mut ConnectionManager, key: &str) -> Result<()> {
        let remaining: i64 = conn.ttl(key).await?;
        if remaining < 0 {
            let _: () = conn
                .expire(key, self.config.safety_ttl_secs as i64)
                .await?;
        }
        Ok(())
    }

    /// Drop one user's cached entry.
    pub async fn invalidate_for_user(&self, tenant_id: Uuid, user_id: Uuid) {
        let key = user_key(tenant_id, user_id);
        let mut conn = self.conn.clone();
        if let Err(e) = conn.del::<_, ()>(&key).await {
            tracing::warn!(%tenant_id, %user_id, error = %e, "cache user invalidation failed, skipping");
            metrics::counter!("verdict_cache_errors_total", "op" => "invalidate_user").increment(1);
        }
    }

    /// Drop the cached entries of every user currently indexed under a role,
    /// then the index itself. The index is rebuilt lazily on the next set.
    pub async fn invalidate_for_role(&self, tenant_id: Uuid, role_id: Uuid) {
        if let Err(e) = self.try_invalidate_for_role(tenant_id, role_id).await {
            tracing::warn!(%tenant_id, %role_id, error = %e, "cache role invalidation failed, skipping");
            metrics::counter!("verdict_cache_errors_total", "op" => "invalidate_role").increment(1);
        }
    }

    async fn try_invalidate_for_role(&self, tenant_id: Uuid, role_id: Uuid) -> Result<()> {
        let index_key = role_index_key(tenant_id, role_id);
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.smembers(&index_key).await?;

        for chunk in members.chunks(self.config.delete_batch_size.max(1)) {
            let user_keys: Vec<String> = chunk
                .iter()
                .filter_map(|raw| Uuid::parse_str(raw).ok())
                .map(|user_id| user_key(tenant_id, user_id))
                .collect();
            if !user_keys.is_empty() {
                let _: () = conn.del(user_keys).await?;
            }
        }

        let _: () = conn.del(&index_key).await?;
        Ok(())
    }

    /// Debounced role invalidation: a burst of calls for the same role
    /// collapses into one `invalidate_for_role` after the window elapses.
    pub fn invalidate_for_role_debounced(&self, tenant_id: Uuid, role_id: Uuid) {
        let cache = self.clone();
        self.debouncer.call((tenant_id, role_id), move || async move {
            cache.invalidate_for_role(tenant_id, role_id).await;
        });
    }

    /// Drop every cached permission set in a tenant. Uses a cursor-based
    /// SCAN with a bounded page size so the cache server is never stalled by
    /// one unbounded listing, and batches deletions.
    pub async fn invalidate_for_tenant(&self, tenant_id: Uuid) {
        if let Err(e) = self.try_invalidate_for_tenant(tenant_id).await {
            tracing::warn!(%tenant_id, error = %e, "cache tenant invalidation failed, skipping");
            metrics::counter!("verdict_cache_errors_total", "op" => "invalidate_tenant")
                .increment(1);
        }
    }

    async fn try_invalidate_for_tenant(&self, tenant_id: Uuid) -> Result<()> {
        let pattern = tenant_pattern(tenant_id);
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut pending: Vec<String> = Vec::new();

        loop {
            let (next, page): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(self.config.scan_page_size)
                .query_async(&mut conn)
                .await?;

            pending.extend(page);
            while pending.len() >= self.config.delete_batch_size.max(1) {
                let batch: Vec<String> = pending
                    .drain(..self.config.delete_batch_size.max(1))
                    .collect();
                let _: () = conn.del(batch).await?;
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        if !pending.is_empty() {
            let _: () = conn.del(pending).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_formats() {
        let tenant_id = Uuid::parse_str("6ba7b810-9dad-11d1-80b4-00c04fd430c8").unwrap();
        let user_id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();

        assert_eq!(
            user_key(tenant_id, user_id),
            "verdict:perms:6ba7b810-9dad-11d1-80b4-00c04fd430c8:550e8400-e29b-41d4-a716-446655440000"
        );
        assert_eq!(
            role_index_key(tenant_id, user_id),
            "verdict:role_users:6ba7b810-9dad-11d1-80b4-00c04fd430c8:550e8400-e29b-41d4-a716-446655440000"
        );
        assert_eq!(
            tenant_pattern(tenant_id),
            "verdict:perms:6ba7b810-9dad-11d1-80b4-00c04fd430c8:*"
        );
    }

    #[test]
    fn test_jittered_ttl_stays_within_bounds() {
        for _ in 0..1000 {
            let ttl = jittered_ttl(300, 30);
            assert!((270..=330).contains(&ttl), "ttl {} out of bounds", ttl);
            assert!(ttl >= 1);
        }
    }

    #[test]
    fn test_jittered_ttl_floors_at_one_second() {
        for _ in 0..1000 {
            let ttl = jittered_ttl(2, 30);
            assert!(ttl >= 1);
        }
    }

    #[test]
    fn test_jittered_ttl_no_jitter_is_exact() {
        for _ in 0..100 {
            assert_eq!(jittered_ttl(300, 0), 300);
        }
    }

    #[test]
    fn test_tenant_pattern_scopes_to_single_tenant() {
        let t1 = Uuid::new_v4();
        let t2 = Uuid::new_v4();
        let user = Uuid::new_v4();

        // A user key from another tenant must not match the pattern prefix.
        let pattern_prefix = tenant_pattern(t1).trim_end_matches('*').to_string();
        assert!(user_key(t1, user).starts_with(&pattern_prefix));
        assert!(!user_key(t2, user).starts_with(&pattern_prefix));
    }
}
