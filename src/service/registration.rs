//! Permission registration: the write path for the tenant permission catalog
//!
//! Plugins and the core installer declare the capability keys they own here.
//! Ownership is exclusive: a key registered by one owner can never be
//! silently taken over by another.

use crate::cache::PermissionCache;
use crate::domain::{validate_schema_ref, Permission, PermissionDefinition};
use crate::error::{AppError, Result};
use crate::repository::RbacRepository;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

pub struct PermissionRegistry<R> {
    repo: Arc<R>,
    cache: Option<PermissionCache>,
}

impl<R: RbacRepository> PermissionRegistry<R> {
    pub fn new(repo: Arc<R>, cache: Option<PermissionCache>) -> Self {
        Self { repo, cache }
    }

    /// Register (or re-register) a plugin's permission definitions.
    ///
    /// The whole batch is applied in one transaction; a key owned by core or
    /// by a different plugin aborts it with a key-conflict error. An empty
    /// batch is a no-op: no transaction, no invalidation.
    pub async fn register_plugin_permissions(
        &self,
        schema: &str,
        tenant_id: Uuid,
        plugin_id: &str,
        definitions: &[PermissionDefinition],
    ) -> Result<()> {
        validate_schema_ref(schema)?;

        if plugin_id.trim().is_empty() {
            return Err(AppError::Validation("plugin id must not be empty".to_string()));
        }
        for definition in definitions {
            definition.validate()?;
        }

        if definitions.is_empty() {
            return Ok(());
        }

        self.repo
            .upsert_plugin_permissions(schema, tenant_id, plugin_id, definitions)
            .await?;

        tracing::info!(
            %tenant_id,
            plugin_id,
            count = definitions.len(),
            "registered plugin permissions"
        );
        metrics::counter!("verdict_permission_registrations_total", "owner" => "plugin")
            .increment(1);

        if let Some(cache) = &self.cache {
            cache.invalidate_for_tenant(tenant_id).await;
        }

        Ok(())
    }

    /// Remove every permission a plugin registered for a tenant, typically
    /// on uninstall. Removing a plugin that registered nothing succeeds.
    pub async fn remove_plugin_permissions(
        &self,
        schema: &str,
        tenant_id: Uuid,
        plugin_id: &str,
    ) -> Result<u64> {
        validate_schema_ref(schema)?;

        let removed = self
            .repo
            .delete_plugin_permissions(schema, tenant_id, plugin_id)
            .await?;

        if removed > 0 {
            tracing::info!(%tenant_id, plugin_id, removed, "removed plugin permissions");
            if let Some(cache) = &self.cache {
                cache.invalidate_for_tenant(tenant_id).await;
            }
        }

        Ok(removed)
    }

    /// Seed the core catalog, system roles, and default grants for a tenant.
    /// Safe to call repeatedly (provisioning retries, upgrades).
    pub async fn register_core_permissions(&self, schema: &str, tenant_id: Uuid) -> Result<()> {
        validate_schema_ref(schema)?;

        self.repo.seed_core_permissions(schema, tenant_id).await?;

        tracing::info!(%tenant_id, "seeded core permission catalog");
        metrics::counter!("verdict_permission_registrations_total", "owner" => "core")
            .increment(1);

        if let Some(cache) = &self.cache {
            cache.invalidate_for_tenant(tenant_id).await;
        }

        Ok(())
    }

    pub async fn list_permissions(&self, schema: &str, tenant_id: Uuid) -> Result<Vec<Permission>> {
        validate_schema_ref(schema)?;
        self.repo.list_permissions(schema, tenant_id).await
    }

    pub async fn find_permission_by_key(
        &self,
        schema: &str,
        tenant_id: Uuid,
        key: &str,
    ) -> Result<Option<Permission>> {
        validate_schema_ref(schema)?;
        self.repo.find_permission_by_key(schema, tenant_id, key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::rbac::MockRbacRepository;

    fn definition(key: &str) -> PermissionDefinition {
        PermissionDefinition {
            key: key.to_string(),
            name: "Some Capability".to_string(),
            description: None,
        }
    }

    #[tokio::test]
    async fn test_empty_batch_is_a_no_op() {
        // No expectations: a store call would panic the mock.
        let repo = MockRbacRepository::new();
        let registry = PermissionRegistry::new(Arc::new(repo), None);

        let result = registry
            .register_plugin_permissions("tenant_acme", Uuid::new_v4(), "reports-plugin", &[])
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_register_validates_schema_ref_before_anything() {
        let repo = MockRbacRepository::new();
        let registry = PermissionRegistry::new(Arc::new(repo), None);

        let result = registry
            .register_plugin_permissions(
                "Tenant-Acme",
                Uuid::new_v4(),
                "reports-plugin",
                &[definition("reports:read")],
            )
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_register_rejects_empty_plugin_id() {
        let repo = MockRbacRepository::new();
        let registry = PermissionRegistry::new(Arc::new(repo), None);

        let result = registry
            .register_plugin_permissions(
                "tenant_acme",
                Uuid::new_v4(),
                "  ",
                &[definition("reports:read")],
            )
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_register_rejects_malformed_key() {
        let repo = MockRbacRepository::new();
        let registry = PermissionRegistry::new(Arc::new(repo), None);

        let result = registry
            .register_plugin_permissions(
                "tenant_acme",
                Uuid::new_v4(),
                "reports-plugin",
                &[definition("Not A Key")],
            )
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_key_conflict_propagates() {
        let mut repo = MockRbacRepository::new();
        repo.expect_upsert_plugin_permissions()
            .returning(|_, _, _, _| {
                Err(AppError::KeyConflict {
                    key: "users:read".to_string(),
                    owner: "core".to_string(),
                })
            });

        let registry = PermissionRegistry::new(Arc::new(repo), None);
        let result = registry
            .register_plugin_permissions(
                "tenant_acme",
                Uuid::new_v4(),
                "reports-plugin",
                &[definition("users:read")],
            )
            .await;

        match result {
            Err(AppError::KeyConflict { key, owner }) => {
                assert_eq!(key, "users:read");
                assert_eq!(owner, "core");
            }
            other => panic!("expected key conflict, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_remove_with_zero_rows_succeeds() {
        let mut repo = MockRbacRepository::new();
        repo.expect_delete_plugin_permissions()
            .returning(|_, _, _| Ok(0));

        let registry = PermissionRegistry::new(Arc::new(repo), None);
        let removed = registry
            .remove_plugin_permissions("tenant_acme", Uuid::new_v4(), "never-installed")
            .await
            .unwrap();
        assert_eq!(removed, 0);
    }
}
