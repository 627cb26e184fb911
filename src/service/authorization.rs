//! Authorization decisions: cache-first permission resolution with an
//! absolute fail-closed boundary
//!
//! `authorize` never returns an error. Whatever goes wrong inside — store
//! down, schema reference invalid, cache poisoned — the caller gets a deny.
//! Fail-open is reserved for the cache layer; the decision itself only ever
//! fails closed.

use crate::cache::PermissionCache;
use crate::domain::{
    validate_schema_ref, AccessDecision, EffectivePermissions, RequestContext, SUPER_ADMIN_ROLE,
};
use crate::error::Result;
use crate::repository::RbacRepository;
use std::sync::Arc;

pub struct AuthorizationService<R> {
    repo: Arc<R>,
    cache: Option<PermissionCache>,
}

impl<R: RbacRepository> AuthorizationService<R> {
    pub fn new(repo: Arc<R>, cache: Option<PermissionCache>) -> Self {
        Self { repo, cache }
    }

    /// Decide whether the user holds every required permission.
    ///
    /// An empty `required` list permits; the resolved held set is still
    /// reported on the decision. Any internal error is converted to a deny
    /// with no capability details attached.
    pub async fn authorize(&self, ctx: &RequestContext, required: &[String]) -> AccessDecision {
        let decision = match self.try_authorize(ctx, required).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::error!(
                    user_id = %ctx.user_id,
                    tenant_id = %ctx.tenant_id,
                    error = %e,
                    "authorization failed, denying"
                );
                metrics::counter!("verdict_authz_failures_total").increment(1);
                AccessDecision::denied(required.to_vec())
            }
        };

        metrics::counter!(
            "verdict_authz_decisions_total",
            "permitted" => if decision.permitted { "true" } else { "false" }
        )
        .increment(1);

        // The audit trail records what was asked and what was answered,
        // never the user's full permission list.
        tracing::info!(
            target: "authz_audit",
            user_id = %ctx.user_id,
            tenant_id = %ctx.tenant_id,
            required = ?decision.checked_permissions,
            permitted = decision.permitted,
            from_cache = decision.from_cache,
            "authorization decision"
        );

        decision
    }

    async fn try_authorize(
        &self,
        ctx: &RequestContext,
        required: &[String],
    ) -> Result<AccessDecision> {
        validate_schema_ref(&ctx.schema_ref)?;

        // Resolution always runs, even for an empty required list, so the
        // decision carries the caller's actual held set.
        let (permissions, from_cache) = self.resolve_permissions(ctx).await?;

        let permitted = required
            .iter()
            .all(|req| permissions.iter().any(|held| matches_permission(held, req)));

        Ok(AccessDecision {
            permitted,
            checked_permissions: required.to_vec(),
            user_permissions: permissions,
            from_cache,
        })
    }

    /// Cache-first resolution of a user's effective permission set. A miss
    /// falls back to the store and repopulates the cache (including the role
    /// reverse index).
    async fn resolve_permissions(&self, ctx: &RequestContext) -> Result<(Vec<String>, bool)> {
        if let Some(cache) = &self.cache {
            if let Some(permissions) = cache.get(ctx.tenant_id, ctx.user_id).await {
                return Ok((permissions, true));
            }
        }

        let grants = self
            .repo
            .find_user_permission_grants(&ctx.schema_ref, ctx.tenant_id, ctx.user_id)
            .await?;

        if let Some(cache) = &self.cache {
            cache
                .set(ctx.tenant_id, ctx.user_id, &grants.permissions, &grants.role_ids)
                .await;
        }

        Ok((grants.permissions, false))
    }

    /// Whether the user holds the super_admin system role. Consults the
    /// pipeline-resolved roles first and falls back to the store; a store
    /// error answers `false`.
    pub async fn is_super_admin(&self, ctx: &RequestContext) -> bool {
        if has_super_admin_role(&ctx.role_names) {
            return true;
        }

        match self
            .repo
            .find_user_role_names(&ctx.schema_ref, ctx.tenant_id, ctx.user_id)
            .await
        {
            Ok(names) => has_super_admin_role(&names),
            Err(e) => {
                tracing::warn!(user_id = %ctx.user_id, error = %e, "super admin lookup failed, assuming not");
                false
            }
        }
    }

    /// Self-service introspection of effective permissions. Fails to empty
    /// lists rather than erroring.
    pub async fn get_user_effective_permissions(&self, ctx: &RequestContext) -> EffectivePermissions {
        if validate_schema_ref(&ctx.schema_ref).is_err() {
            return EffectivePermissions::default();
        }

        match self.resolve_permissions(ctx).await {
            Ok((permissions, _)) => {
                let wildcard_permissions = permissions
                    .iter()
                    .filter(|key| key.split(':').any(|segment| segment == "*"))
                    .cloned()
                    .collect();
                EffectivePermissions {
                    permissions,
                    wildcard_permissions,
                }
            }
            Err(e) => {
                tracing::warn!(
                    user_id = %ctx.user_id,
                    tenant_id = %ctx.tenant_id,
                    error = %e,
                    "effective permission lookup failed, returning empty"
                );
                EffectivePermissions::default()
            }
        }
    }
}

/// Whether an already-resolved role list carries the super_admin system
/// role. The pure form of [`AuthorizationService::is_super_admin`], for
/// callers that hold the role names and need no store fallback.
pub fn has_super_admin_role(role_names: &[String]) -> bool {
    role_names.iter().any(|name| name == SUPER_ADMIN_ROLE)
}

/// Segment-wise wildcard match of a held permission key against a required
/// one. A held `*` segment matches the whole remainder of the required key;
/// a held key that runs out of segments early matches nothing.
pub fn matches_permission(held: &str, required: &str) -> bool {
    let mut held_segments = held.split(':');
    let mut required_segments = required.split(':');

    loop {
        match (held_segments.next(), required_segments.next()) {
            (None, None) => return true,
            (Some("*"), Some(_)) => return true,
            (Some(h), Some(r)) if h == r => continue,
            _ => return false,
        }
    }
}
