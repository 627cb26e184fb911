//! Shared application state: pool, cache, guard, and services wired together

use crate::cache::PermissionCache;
use crate::config::Config;
use crate::error::Result;
use crate::middleware::MutationRateGuard;
use crate::repository::{PolicyRepositoryImpl, RbacRepositoryImpl};
use crate::service::{AuthorizationService, PermissionRegistry, PolicyService, RoleService};
use redis::aio::ConnectionManager;
use sqlx::mysql::MySqlPoolOptions;
use sqlx::MySqlPool;
use std::sync::Arc;

/// Application state shared across handlers and middleware.
///
/// Redis is optional at construction time: without it the services run
/// uncached and the mutation guard is a no-op, but decisions stay correct.
#[derive(Clone)]
pub struct AppState {
    pub pool: MySqlPool,
    pub config: Config,
    pub cache: Option<PermissionCache>,
    pub guard: MutationRateGuard,
    pub authorization: Arc<AuthorizationService<RbacRepositoryImpl>>,
    pub registry: Arc<PermissionRegistry<RbacRepositoryImpl>>,
    pub roles: Arc<RoleService<RbacRepositoryImpl>>,
    pub policies: Arc<PolicyService<PolicyRepositoryImpl>>,
}

impl AppState {
    /// Connect the database pool and build the full state from configuration.
    pub async fn from_config(config: Config) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(config.database.max_connections)
            .min_connections(config.database.min_connections)
            .connect(&config.database.url)
            .await?;

        Ok(Self::with_pool(pool, config).await)
    }

    /// Build the state over an existing pool. Redis connection failures are
    /// logged and degrade to a cacheless, unguarded configuration.
    pub async fn with_pool(pool: MySqlPool, config: Config) -> Self {
        let redis_conn = match redis::Client::open(config.redis.url.as_str()) {
            Ok(client) => match ConnectionManager::new(client).await {
                Ok(conn) => Some(conn),
                Err(e) => {
                    tracing::warn!(error = %e, "Redis unreachable, running without cache or rate guard");
                    None
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "invalid Redis URL, running without cache or rate guard");
                None
            }
        };

        let cache = redis_conn
            .clone()
            .map(|conn| PermissionCache::with_manager(conn, config.cache.clone()));

        let guard = match redis_conn {
            Some(conn) => {
                MutationRateGuard::new(conn, config.rate_guard.clone(), config.environment)
            }
            None => MutationRateGuard::noop(),
        };

        let rbac_repo = Arc::new(RbacRepositoryImpl::new(pool.clone()));
        let policy_repo = Arc::new(PolicyRepositoryImpl::new(pool.clone()));

        Self {
            authorization: Arc::new(AuthorizationService::new(
                Arc::clone(&rbac_repo),
                cache.clone(),
            )),
            registry: Arc::new(PermissionRegistry::new(
                Arc::clone(&rbac_repo),
                cache.clone(),
            )),
            roles: Arc::new(RoleService::new(rbac_repo, cache.clone())),
            policies: Arc::new(PolicyService::new(policy_repo)),
            guard,
            cache,
            pool,
            config,
        }
    }
}
