//! Role management: CRUD, permission grants, and user assignment
//!
//! Every mutation here is a cache-invalidation source. Permission-list edits
//! invalidate through the debounced role path so a bulk edit collapses to
//! one invalidation; assignment changes touch exactly one user's entry.

use crate::cache::PermissionCache;
use crate::domain::{validate_schema_ref, CreateRoleInput, Role, UpdateRoleInput};
use crate::error::{AppError, Result};
use crate::repository::RbacRepository;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

pub struct RoleService<R> {
    repo: Arc<R>,
    cache: Option<PermissionCache>,
}

impl<R: RbacRepository> RoleService<R> {
    pub fn new(repo: Arc<R>, cache: Option<PermissionCache>) -> Self {
        Self { repo, cache }
    }

    pub async fn list_roles(&self, schema: &str, tenant_id: Uuid) -> Result<Vec<Role>> {
        validate_schema_ref(schema)?;
        self.repo.list_roles(schema, tenant_id).await
    }

    pub async fn get_role(&self, schema: &str, tenant_id: Uuid, role_id: Uuid) -> Result<Role> {
        validate_schema_ref(schema)?;
        self.repo
            .find_role_by_id(schema, tenant_id, role_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Role {} not found", role_id)))
    }

    pub async fn create_role(
        &self,
        schema: &str,
        tenant_id: Uuid,
        input: CreateRoleInput,
    ) -> Result<Role> {
        validate_schema_ref(schema)?;
        input.validate()?;

        if self
            .repo
            .find_role_by_name(schema, tenant_id, &input.name)
            .await?
            .is_some()
        {
            return Err(AppError::Validation(format!(
                "Role '{}' already exists",
                input.name
            )));
        }

        let role = self.repo.create_role(schema, tenant_id, &input).await?;
        tracing::info!(%tenant_id, role_id = %role.id, name = %role.name, "created role");
        Ok(role)
    }

    pub async fn update_role(
        &self,
        schema: &str,
        tenant_id: Uuid,
        role_id: Uuid,
        input: UpdateRoleInput,
    ) -> Result<Role> {
        validate_schema_ref(schema)?;
        input.validate()?;

        let existing = self.get_role(schema, tenant_id, role_id).await?;
        if existing.is_system {
            return Err(AppError::SystemRoleImmutable(existing.name));
        }

        if let Some(new_name) = &input.name {
            if new_name != &existing.name
                && self
                    .repo
                    .find_role_by_name(schema, tenant_id, new_name)
                    .await?
                    .is_some()
            {
                return Err(AppError::Validation(format!(
                    "Role '{}' already exists",
                    new_name
                )));
            }
        }

        self.repo.update_role(schema, tenant_id, role_id, &input).await
    }

    pub async fn delete_role(&self, schema: &str, tenant_id: Uuid, role_id: Uuid) -> Result<()> {
        validate_schema_ref(schema)?;

        let existing = self.get_role(schema, tenant_id, role_id).await?;
        if existing.is_system {
            return Err(AppError::SystemRoleImmutable(existing.name));
        }

        self.repo.delete_role(schema, tenant_id, role_id).await?;
        tracing::info!(%tenant_id, %role_id, "deleted role");

        // Deletion takes effect immediately; no debounce.
        if let Some(cache) = &self.cache {
            cache.invalidate_for_role(tenant_id, role_id).await;
        }

        Ok(())
    }

    /// Grant a permission to a role. System roles keep their seeded grants.
    pub async fn add_permission_to_role(
        &self,
        schema: &str,
        tenant_id: Uuid,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> Result<()> {
        validate_schema_ref(schema)?;

        let role = self.get_role(schema, tenant_id, role_id).await?;
        if role.is_system {
            return Err(AppError::SystemRoleImmutable(role.name));
        }

        self.repo
            .add_permission_to_role(schema, tenant_id, role_id, permission_id)
            .await?;

        self.invalidate_role_debounced(tenant_id, role_id);
        Ok(())
    }

    pub async fn remove_permission_from_role(
        &self,
        schema: &str,
        tenant_id: Uuid,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> Result<()> {
        validate_schema_ref(schema)?;

        let role = self.get_role(schema, tenant_id, role_id).await?;
        if role.is_system {
            return Err(AppError::SystemRoleImmutable(role.name));
        }

        self.repo
            .remove_permission_from_role(schema, tenant_id, role_id, permission_id)
            .await?;

        self.invalidate_role_debounced(tenant_id, role_id);
        Ok(())
    }

    /// Assigning system roles to users is allowed; it is the role definition
    /// that is immutable, not its membership.
    pub async fn assign_role_to_user(
        &self,
        schema: &str,
        tenant_id: Uuid,
        user_id: Uuid,
        role_id: Uuid,
    ) -> Result<()> {
        validate_schema_ref(schema)?;

        self.repo
            .assign_role_to_user(schema, tenant_id, user_id, role_id)
            .await?;

        if let Some(cache) = &self.cache {
            cache.invalidate_for_user(tenant_id, user_id).await;
        }
        Ok(())
    }

    pub async fn remove_role_from_user(
        &self,
        schema: &str,
        tenant_id: Uuid,
        user_id: Uuid,
        role_id: Uuid,
    ) -> Result<()> {
        validate_schema_ref(schema)?;

        self.repo
            .remove_role_from_user(schema, tenant_id, user_id, role_id)
            .await?;

        if let Some(cache) = &self.cache {
            cache.invalidate_for_user(tenant_id, user_id).await;
        }
        Ok(())
    }

    fn invalidate_role_debounced(&self, tenant_id: Uuid, role_id: Uuid) {
        if let Some(cache) = &self.cache {
            cache.invalidate_for_role_debounced(tenant_id, role_id);
        }
    }
}
