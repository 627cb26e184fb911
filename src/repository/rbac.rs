//! RBAC repository: roles, permissions, and assignments in the tenant schema
//!
//! Every query is qualified with a validated tenant schema reference. The
//! schema name is re-validated here before interpolation as a second line of
//! defense behind the service layer.

use crate::domain::{
    validate_schema_ref, CreateRoleInput, Permission, PermissionDefinition, Role, UpdateRoleInput,
    UserPermissionGrants, CORE_PERMISSIONS, DEFAULT_ROLE_GRANTS, SYSTEM_ROLES,
};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use sqlx::MySqlPool;
use uuid::Uuid;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RbacRepository: Send + Sync {
    /// De-duplicated effective permissions for a user, joined across
    /// user_roles -> role_permissions -> permissions, plus the role IDs
    /// they flow from (for the cache reverse index).
    async fn find_user_permission_grants(
        &self,
        schema: &str,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<UserPermissionGrants>;

    async fn find_user_role_names(
        &self,
        schema: &str,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<String>>;

    // Roles
    async fn find_role_by_id(
        &self,
        schema: &str,
        tenant_id: Uuid,
        role_id: Uuid,
    ) -> Result<Option<Role>>;
    async fn find_role_by_name(
        &self,
        schema: &str,
        tenant_id: Uuid,
        name: &str,
    ) -> Result<Option<Role>>;
    async fn list_roles(&self, schema: &str, tenant_id: Uuid) -> Result<Vec<Role>>;
    async fn create_role(
        &self,
        schema: &str,
        tenant_id: Uuid,
        input: &CreateRoleInput,
    ) -> Result<Role>;
    async fn update_role(
        &self,
        schema: &str,
        tenant_id: Uuid,
        role_id: Uuid,
        input: &UpdateRoleInput,
    ) -> Result<Role>;
    async fn delete_role(&self, schema: &str, tenant_id: Uuid, role_id: Uuid) -> Result<()>;

    // Role-Permission mapping
    async fn add_permission_to_role(
        &self,
        schema: &str,
        tenant_id: Uuid,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> Result<()>;
    async fn remove_permission_from_role(
        &self,
        schema: &str,
        tenant_id: Uuid,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> Result<()>;

    // User-Role assignment
    async fn assign_role_to_user(
        &self,
        schema: &str,
        tenant_id: Uuid,
        user_id: Uuid,
        role_id: Uuid,
    ) -> Result<()>;
    async fn remove_role_from_user(
        &self,
        schema: &str,
        tenant_id: Uuid,
        user_id: Uuid,
        role_id: Uuid,
    ) -> Result<()>;

    // Permissions
    async fn find_permission_by_key(
        &self,
        schema: &str,
        tenant_id: Uuid,
        key: &str,
    ) -> Result<Option<Permission>>;
    async fn list_permissions(&self, schema: &str, tenant_id: Uuid) -> Result<Vec<Permission>>;

    /// Insert or update the given plugin-owned permission definitions in a
    /// single transaction. A key owned by core or by a different plugin
    /// aborts the whole call with a key-conflict error; no partial writes
    /// remain visible.
    async fn upsert_plugin_permissions(
        &self,
        schema: &str,
        tenant_id: Uuid,
        plugin_id: &str,
        definitions: &[PermissionDefinition],
    ) -> Result<()>;

    /// Delete all of a plugin's permissions (and their role links) for a
    /// tenant. Zero affected rows is success. Returns the number of
    /// permission rows removed.
    async fn delete_plugin_permissions(
        &self,
        schema: &str,
        tenant_id: Uuid,
        plugin_id: &str,
    ) -> Result<u64>;

    /// Idempotently seed the core permission catalog, the system roles, and
    /// the default role grants for a newly provisioned tenant.
    async fn seed_core_permissions(&self, schema: &str, tenant_id: Uuid) -> Result<()>;
}

pub struct RbacRepositoryImpl {
    pool: MySqlPool,
}

const ROLE_COLUMNS: &str = "id, tenant_id, name, description, is_system, created_at, updated_at";
const PERMISSION_COLUMNS: &str =
    "id, tenant_id, permission_key, name, description, plugin_id, created_at";

impl RbacRepositoryImpl {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RbacRepository for RbacRepositoryImpl {
    async fn find_user_permission_grants(
        &self,
        schema: &str,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<UserPermissionGrants> {
        validate_schema_ref(schema)?;

        let permissions: Vec<(String,)> = sqlx::query_as(&format!(
            r#"
            SELECT DISTINCT p.permission_key
            FROM `{schema}`.permissions p
            INNER JOIN `{schema}`.role_permissions rp ON p.id = rp.permission_id
            INNER JOIN `{schema}`.user_roles ur ON rp.role_id = ur.role_id
            WHERE ur.user_id = ? AND ur.tenant_id = ?
            "#
        ))
        .bind(user_id.to_string())
        .bind(tenant_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let role_ids: Vec<(String,)> = sqlx::query_as(&format!(
            "SELECT role_id FROM `{schema}`.user_roles WHERE user_id = ? AND tenant_id = ?"
        ))
        .bind(user_id.to_string())
        .bind(tenant_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(UserPermissionGrants {
            permissions: permissions.into_iter().map(|(key,)| key).collect(),
            role_ids: role_ids
                .into_iter()
                .filter_map(|(raw,)| Uuid::parse_str(&raw).ok())
                .collect(),
        })
    }

    async fn find_user_role_names(
        &self,
        schema: &str,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<String>> {
        validate_schema_ref(schema)?;

        let names: Vec<(String,)> = sqlx::query_as(&format!(
            r#"
            SELECT r.name
            FROM `{schema}`.roles r
            INNER JOIN `{schema}`.user_roles ur ON r.id = ur.role_id
            WHERE ur.user_id = ? AND ur.tenant_id = ?
            "#
        ))
        .bind(user_id.to_string())
        .bind(tenant_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(names.into_iter().map(|(name,)| name).collect())
    }

    async fn find_role_by_id(
        &self,
        schema: &str,
        tenant_id: Uuid,
        role_id: Uuid,
    ) -> Result<Option<Role>> {
        validate_schema_ref(schema)?;

        let role = sqlx::query_as::<_, Role>(&format!(
            "SELECT {ROLE_COLUMNS} FROM `{schema}`.roles WHERE id = ? AND tenant_id = ?"
        ))
        .bind(role_id.to_string())
        .bind(tenant_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(role)
    }

    async fn find_role_by_name(
        &self,
        schema: &str,
        tenant_id: Uuid,
        name: &str,
    ) -> Result<Option<Role>> {
        validate_schema_ref(schema)?;

        let role = sqlx::query_as::<_, Role>(&format!(
            "SELECT {ROLE_COLUMNS} FROM `{schema}`.roles WHERE tenant_id = ? AND name = ?"
        ))
        .bind(tenant_id.to_string())
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(role)
    }

    async fn list_roles(&self, schema: &str, tenant_id: Uuid) -> Result<Vec<Role>> {
        validate_schema_ref(schema)?;

        let roles = sqlx::query_as::<_, Role>(&format!(
            "SELECT {ROLE_COLUMNS} FROM `{schema}`.roles WHERE tenant_id = ? ORDER BY name"
        ))
        .bind(tenant_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(roles)
    }

    async fn create_role(
        &self,
        schema: &str,
        tenant_id: Uuid,
        input: &CreateRoleInput,
    ) -> Result<Role> {
        validate_schema_ref(schema)?;
        let id = Uuid::new_v4();

        sqlx::query(&format!(
            r#"
            INSERT INTO `{schema}`.roles (id, tenant_id, name, description, is_system, created_at, updated_at)
            VALUES (?, ?, ?, ?, FALSE, NOW(), NOW())
            "#
        ))
        .bind(id.to_string())
        .bind(tenant_id.to_string())
        .bind(&input.name)
        .bind(&input.description)
        .execute(&self.pool)
        .await?;

        self.find_role_by_id(schema, tenant_id, id)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to create role")))
    }

    async fn update_role(
        &self,
        schema: &str,
        tenant_id: Uuid,
        role_id: Uuid,
        input: &UpdateRoleInput,
    ) -> Result<Role> {
        validate_schema_ref(schema)?;

        let existing = self
            .find_role_by_id(schema, tenant_id, role_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Role {} not found", role_id)))?;

        let name = input.name.as_ref().unwrap_or(&existing.name);
        let description = input.description.as_ref().or(existing.description.as_ref());

        sqlx::query(&format!(
            r#"
            UPDATE `{schema}`.roles
            SET name = ?, description = ?, updated_at = NOW()
            WHERE id = ? AND tenant_id = ?
            "#
        ))
        .bind(name)
        .bind(description)
        .bind(role_id.to_string())
        .bind(tenant_id.to_string())
        .execute(&self.pool)
        .await?;

        self.find_role_by_id(schema, tenant_id, role_id)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to update role")))
    }

    async fn delete_role(&self, schema: &str, tenant_id: Uuid, role_id: Uuid) -> Result<()> {
        validate_schema_ref(schema)?;

        let mut tx = self.pool.begin().await?;

        // Cascade: mappings first, then the role itself
        sqlx::query(&format!(
            "DELETE FROM `{schema}`.role_permissions WHERE role_id = ? AND tenant_id = ?"
        ))
        .bind(role_id.to_string())
        .bind(tenant_id.to_string())
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            "DELETE FROM `{schema}`.user_roles WHERE role_id = ? AND tenant_id = ?"
        ))
        .bind(role_id.to_string())
        .bind(tenant_id.to_string())
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query(&format!(
            "DELETE FROM `{schema}`.roles WHERE id = ? AND tenant_id = ?"
        ))
        .bind(role_id.to_string())
        .bind(tenant_id.to_string())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Role {} not found", role_id)));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn add_permission_to_role(
        &self,
        schema: &str,
        tenant_id: Uuid,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> Result<()> {
        validate_schema_ref(schema)?;

        sqlx::query(&format!(
            "INSERT IGNORE INTO `{schema}`.role_permissions (role_id, permission_id, tenant_id) VALUES (?, ?, ?)"
        ))
        .bind(role_id.to_string())
        .bind(permission_id.to_string())
        .bind(tenant_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove_permission_from_role(
        &self,
        schema: &str,
        tenant_id: Uuid,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> Result<()> {
        validate_schema_ref(schema)?;

        sqlx::query(&format!(
            "DELETE FROM `{schema}`.role_permissions WHERE role_id = ? AND permission_id = ? AND tenant_id = ?"
        ))
        .bind(role_id.to_string())
        .bind(permission_id.to_string())
        .bind(tenant_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn assign_role_to_user(
        &self,
        schema: &str,
        tenant_id: Uuid,
        user_id: Uuid,
        role_id: Uuid,
    ) -> Result<()> {
        validate_schema_ref(schema)?;

        let role = self.find_role_by_id(schema, tenant_id, role_id).await?;
        if role.is_none() {
            return Err(AppError::NotFound(format!("Role {} not found", role_id)));
        }

        sqlx::query(&format!(
            r#"
            INSERT IGNORE INTO `{schema}`.user_roles (user_id, role_id, tenant_id, assigned_at)
            VALUES (?, ?, ?, NOW())
            "#
        ))
        .bind(user_id.to_string())
        .bind(role_id.to_string())
        .bind(tenant_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove_role_from_user(
        &self,
        schema: &str,
        tenant_id: Uuid,
        user_id: Uuid,
        role_id: Uuid,
    ) -> Result<()> {
        validate_schema_ref(schema)?;

        sqlx::query(&format!(
            "DELETE FROM `{schema}`.user_roles WHERE user_id = ? AND role_id = ? AND tenant_id = ?"
        ))
        .bind(user_id.to_string())
        .bind(role_id.to_string())
        .bind(tenant_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_permission_by_key(
        &self,
        schema: &str,
        tenant_id: Uuid,
        key: &str,
    ) -> Result<Option<Permission>> {
        validate_schema_ref(schema)?;

        let permission = sqlx::query_as::<_, Permission>(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM `{schema}`.permissions WHERE tenant_id = ? AND permission_key = ?"
        ))
        .bind(tenant_id.to_string())
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(permission)
    }

    async fn list_permissions(&self, schema: &str, tenant_id: Uuid) -> Result<Vec<Permission>> {
        validate_schema_ref(schema)?;

        let permissions = sqlx::query_as::<_, Permission>(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM `{schema}`.permissions WHERE tenant_id = ? ORDER BY permission_key"
        ))
        .bind(tenant_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(permissions)
    }

    async fn upsert_plugin_permissions(
        &self,
        schema: &str,
        tenant_id: Uuid,
        plugin_id: &str,
        definitions: &[PermissionDefinition],
    ) -> Result<()> {
        validate_schema_ref(schema)?;

        let mut tx = self.pool.begin().await?;

        for def in definitions {
            // Lock the row so concurrent registrations of the same key
            // serialize on the store.
            let existing = sqlx::query_as::<_, Permission>(&format!(
                "SELECT {PERMISSION_COLUMNS} FROM `{schema}`.permissions WHERE tenant_id = ? AND permission_key = ? FOR UPDATE"
            ))
            .bind(tenant_id.to_string())
            .bind(&def.key)
            .fetch_optional(&mut *tx)
            .await?;

            match existing {
                None => {
                    sqlx::query(&format!(
                        r#"
                        INSERT INTO `{schema}`.permissions
                            (id, tenant_id, permission_key, name, description, plugin_id, created_at)
                        VALUES (?, ?, ?, ?, ?, ?, NOW())
                        "#
                    ))
                    .bind(Uuid::new_v4().to_string())
                    .bind(tenant_id.to_string())
                    .bind(&def.key)
                    .bind(&def.name)
                    .bind(&def.description)
                    .bind(plugin_id)
                    .execute(&mut *tx)
                    .await?;
                }
                Some(ref p) if p.plugin_id.as_deref() == Some(plugin_id) => {
                    // Same owner re-registering: overwrite provided fields,
                    // preserve a stored description when none was sent.
                    sqlx::query(&format!(
                        r#"
                        UPDATE `{schema}`.permissions
                        SET name = ?, description = COALESCE(?, description)
                        WHERE tenant_id = ? AND permission_key = ?
                        "#
                    ))
                    .bind(&def.name)
                    .bind(&def.description)
                    .bind(tenant_id.to_string())
                    .bind(&def.key)
                    .execute(&mut *tx)
                    .await?;
                }
                Some(p) => {
                    // Dropping the transaction rolls back every earlier
                    // write in this call.
                    return Err(AppError::KeyConflict {
                        key: def.key.clone(),
                        owner: p.owner(),
                    });
                }
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_plugin_permissions(
        &self,
        schema: &str,
        tenant_id: Uuid,
        plugin_id: &str,
    ) -> Result<u64> {
        validate_schema_ref(schema)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            r#"
            DELETE rp FROM `{schema}`.role_permissions rp
            INNER JOIN `{schema}`.permissions p ON rp.permission_id = p.id
            WHERE p.tenant_id = ? AND p.plugin_id = ?
            "#
        ))
        .bind(tenant_id.to_string())
        .bind(plugin_id)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query(&format!(
            "DELETE FROM `{schema}`.permissions WHERE tenant_id = ? AND plugin_id = ?"
        ))
        .bind(tenant_id.to_string())
        .bind(plugin_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn seed_core_permissions(&self, schema: &str, tenant_id: Uuid) -> Result<()> {
        validate_schema_ref(schema)?;

        let mut tx = self.pool.begin().await?;

        // System roles must always exist; re-running is a no-op thanks to
        // the (tenant_id, name) unique index.
        for role_name in SYSTEM_ROLES {
            sqlx::query(&format!(
                r#"
                INSERT IGNORE INTO `{schema}`.roles
                    (id, tenant_id, name, description, is_system, created_at, updated_at)
                VALUES (?, ?, ?, NULL, TRUE, NOW(), NOW())
                "#
            ))
            .bind(Uuid::new_v4().to_string())
            .bind(tenant_id.to_string())
            .bind(role_name)
            .execute(&mut *tx)
            .await?;
        }

        for (key, name) in CORE_PERMISSIONS {
            sqlx::query(&format!(
                r#"
                INSERT IGNORE INTO `{schema}`.permissions
                    (id, tenant_id, permission_key, name, description, plugin_id, created_at)
                VALUES (?, ?, ?, ?, NULL, NULL, NOW())
                "#
            ))
            .bind(Uuid::new_v4().to_string())
            .bind(tenant_id.to_string())
            .bind(key)
            .bind(name)
            .execute(&mut *tx)
            .await?;
        }

        for (role_name, grants) in DEFAULT_ROLE_GRANTS {
            for key in grants.iter() {
                sqlx::query(&format!(
                    r#"
                    INSERT IGNORE INTO `{schema}`.role_permissions (role_id, permission_id, tenant_id)
                    SELECT r.id, p.id, ?
                    FROM `{schema}`.roles r, `{schema}`.permissions p
                    WHERE r.tenant_id = ? AND r.name = ?
                      AND p.tenant_id = ? AND p.permission_key = ?
                    "#
                ))
                .bind(tenant_id.to_string())
                .bind(tenant_id.to_string())
                .bind(role_name)
                .bind(tenant_id.to_string())
                .bind(key)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }
}
