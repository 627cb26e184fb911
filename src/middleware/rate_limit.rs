//! Mutation rate guard
//!
//! Fixed-window Redis counter over permission-mutating operations (role and
//! policy writes). The guard protects the invalidation machinery from
//! pathological mutation bursts; it is an operational brake, not a security
//! control, so an unreachable Redis lets mutations through (fail-open) and
//! non-production environments bypass it entirely.

use crate::config::{Environment, RateGuardConfig};
use crate::domain::RequestContext;
use crate::error::{AppError, Result};
use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use redis::{aio::ConnectionManager, AsyncCommands};

/// Redis key for one scope's window counter. Scope is a tenant id, or
/// `"global"` when no tenant is resolved.
fn scope_key(scope: &str) -> String {
    format!("verdict:rate:mutations:{}", scope)
}

/// Result of a guard check
#[derive(Debug, Clone)]
pub struct GuardOutcome {
    /// Whether the mutation may proceed
    pub allowed: bool,
    /// Configured window limit
    pub limit: u64,
    /// Requests left in the current window
    pub remaining: u64,
    /// Seconds until the window resets; only meaningful when throttled
    pub retry_after_secs: u64,
}

impl GuardOutcome {
    fn pass(limit: u64, remaining: u64) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            retry_after_secs: 0,
        }
    }
}

#[derive(Clone)]
pub struct MutationRateGuard {
    config: RateGuardConfig,
    redis: Option<ConnectionManager>,
    environment: Environment,
}

impl MutationRateGuard {
    pub fn new(redis: ConnectionManager, config: RateGuardConfig, environment: Environment) -> Self {
        Self {
            config,
            redis: Some(redis),
            environment,
        }
    }

    /// A guard that never throttles (tests, tooling, guard disabled).
    pub fn noop() -> Self {
        Self {
            config: RateGuardConfig {
                enabled: false,
                ..Default::default()
            },
            redis: None,
            environment: Environment::Development,
        }
    }

    /// The guard only bites in production with Redis configured.
    pub fn is_enforced(&self) -> bool {
        self.config.enabled && self.environment.is_production() && self.redis.is_some()
    }

    /// Count a mutation against the scope's fixed window and decide whether
    /// it may proceed. Any Redis failure allows the mutation.
    pub async fn check(&self, scope: &str) -> GuardOutcome {
        if !self.is_enforced() {
            return GuardOutcome::pass(self.config.max_requests, self.config.max_requests);
        }

        match self.try_check(scope).await {
            Ok(outcome) => {
                if !outcome.allowed {
                    metrics::counter!("verdict_rate_guard_throttled_total", "scope" => scope.to_string())
                        .increment(1);
                }
                outcome
            }
            Err(e) => {
                tracing::warn!(scope, error = %e, "rate guard check failed, allowing");
                metrics::counter!("verdict_rate_guard_unavailable_total").increment(1);
                GuardOutcome::pass(self.config.max_requests, self.config.max_requests)
            }
        }
    }

    async fn try_check(&self, scope: &str) -> Result<GuardOutcome> {
        let Some(redis) = &self.redis else {
            return Ok(GuardOutcome::pass(
                self.config.max_requests,
                self.config.max_requests,
            ));
        };

        let key = scope_key(scope);
        let mut conn = redis.clone();

        let count: u64 = conn.incr(&key, 1).await?;
        if count == 1 {
            // First hit opens the window.
            let _: () = conn.expire(&key, self.config.window_secs as i64).await?;
        }

        if count > self.config.max_requests {
            let ttl: i64 = conn.ttl(&key).await?;
            return Ok(GuardOutcome {
                allowed: false,
                limit: self.config.max_requests,
                remaining: 0,
                retry_after_secs: ttl.max(1) as u64,
            });
        }

        Ok(GuardOutcome::pass(
            self.config.max_requests,
            self.config.max_requests - count,
        ))
    }
}

fn apply_rate_headers(response: &mut Response, outcome: &GuardOutcome) {
    if let Ok(value) = outcome.limit.to_string().parse() {
        response.headers_mut().insert("X-RateLimit-Limit", value);
    }
    if let Ok(value) = outcome.remaining.to_string().parse() {
        response
            .headers_mut()
            .insert("X-RateLimit-Remaining", value);
    }
}

fn throttled_response(outcome: &GuardOutcome) -> Response {
    let mut response = AppError::RateLimited {
        retry_after_secs: outcome.retry_after_secs,
    }
    .into_response();
    apply_rate_headers(&mut response, outcome);
    response
}

/// Axum middleware wrapping the guard around mutation routes. Scopes the
/// window by the resolved tenant, falling back to a global bucket, and
/// attaches `X-RateLimit-*` headers to both passing and throttled responses.
pub async fn mutation_rate_guard_middleware(
    State(guard): State<MutationRateGuard>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let scope = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.tenant_id.to_string())
        .unwrap_or_else(|| "global".to_string());

    let outcome = guard.check(&scope).await;
    if !outcome.allowed {
        return throttled_response(&outcome);
    }

    let mut response = next.run(request).await;
    apply_rate_headers(&mut response, &outcome);
    response
}
