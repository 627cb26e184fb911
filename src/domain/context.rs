//! Request context passed through the authorization call chain
//!
//! The upstream pipeline resolves identity and tenancy before this crate is
//! invoked; everything it resolved travels in this struct rather than being
//! rediscovered from an ambient request object.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Strongly-typed per-request context supplied by the upstream pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    /// Authenticated user (identity established upstream)
    pub user_id: Uuid,
    /// Resolved tenant
    pub tenant_id: Uuid,
    /// Validated schema reference for the tenant's data location
    pub schema_ref: String,
    /// Role names the pipeline already resolved for the user, if any.
    /// Used for the super-admin ABAC bypass; RBAC checks never trust it.
    pub role_names: Vec<String>,
}

impl RequestContext {
    pub fn new(user_id: Uuid, tenant_id: Uuid, schema_ref: impl Into<String>) -> Self {
        Self {
            user_id,
            tenant_id,
            schema_ref: schema_ref.into(),
            role_names: Vec::new(),
        }
    }

    pub fn with_roles(mut self, role_names: Vec<String>) -> Self {
        self.role_names = role_names;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_context_builder() {
        let ctx = RequestContext::new(Uuid::new_v4(), Uuid::new_v4(), "tenant_acme")
            .with_roles(vec!["tenant_admin".to_string()]);
        assert_eq!(ctx.schema_ref, "tenant_acme");
        assert_eq!(ctx.role_names, vec!["tenant_admin"]);
    }
}
