//! Policy repository: ABAC policy rows in the tenant schema

use crate::domain::{validate_schema_ref, CreatePolicyInput, Policy, UpdatePolicyInput};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use sqlx::MySqlPool;
use uuid::Uuid;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PolicyRepository: Send + Sync {
    async fn find_by_id(
        &self,
        schema: &str,
        tenant_id: Uuid,
        policy_id: Uuid,
    ) -> Result<Option<Policy>>;
    async fn list(&self, schema: &str, tenant_id: Uuid) -> Result<Vec<Policy>>;

    /// Active policies for one resource, highest priority first. This is the
    /// working set the evaluator walks per decision.
    async fn find_active_by_resource(
        &self,
        schema: &str,
        tenant_id: Uuid,
        resource: &str,
    ) -> Result<Vec<Policy>>;

    async fn create(
        &self,
        schema: &str,
        tenant_id: Uuid,
        input: &CreatePolicyInput,
    ) -> Result<Policy>;
    async fn update(
        &self,
        schema: &str,
        tenant_id: Uuid,
        policy_id: Uuid,
        input: &UpdatePolicyInput,
    ) -> Result<Policy>;
    async fn delete(&self, schema: &str, tenant_id: Uuid, policy_id: Uuid) -> Result<()>;
}

pub struct PolicyRepositoryImpl {
    pool: MySqlPool,
}

const POLICY_COLUMNS: &str = "id, tenant_id, name, resource, effect, conditions, priority, source, plugin_id, is_active, created_at, updated_at";

impl PolicyRepositoryImpl {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PolicyRepository for PolicyRepositoryImpl {
    async fn find_by_id(
        &self,
        schema: &str,
        tenant_id: Uuid,
        policy_id: Uuid,
    ) -> Result<Option<Policy>> {
        validate_schema_ref(schema)?;

        let policy = sqlx::query_as::<_, Policy>(&format!(
            "SELECT {POLICY_COLUMNS} FROM `{schema}`.policies WHERE id = ? AND tenant_id = ?"
        ))
        .bind(policy_id.to_string())
        .bind(tenant_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(policy)
    }

    async fn list(&self, schema: &str, tenant_id: Uuid) -> Result<Vec<Policy>> {
        validate_schema_ref(schema)?;

        let policies = sqlx::query_as::<_, Policy>(&format!(
            "SELECT {POLICY_COLUMNS} FROM `{schema}`.policies WHERE tenant_id = ? ORDER BY resource, priority DESC"
        ))
        .bind(tenant_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(policies)
    }

    async fn find_active_by_resource(
        &self,
        schema: &str,
        tenant_id: Uuid,
        resource: &str,
    ) -> Result<Vec<Policy>> {
        validate_schema_ref(schema)?;

        let policies = sqlx::query_as::<_, Policy>(&format!(
            r#"
            SELECT {POLICY_COLUMNS} FROM `{schema}`.policies
            WHERE tenant_id = ? AND resource = ? AND is_active = TRUE
            ORDER BY priority DESC
            "#
        ))
        .bind(tenant_id.to_string())
        .bind(resource)
        .fetch_all(&self.pool)
        .await?;

        Ok(policies)
    }

    async fn create(
        &self,
        schema: &str,
        tenant_id: Uuid,
        input: &CreatePolicyInput,
    ) -> Result<Policy> {
        validate_schema_ref(schema)?;
        let id = Uuid::new_v4();

        sqlx::query(&format!(
            r#"
            INSERT INTO `{schema}`.policies
                (id, tenant_id, name, resource, effect, conditions, priority, source, plugin_id, is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, TRUE, NOW(), NOW())
            "#
        ))
        .bind(id.to_string())
        .bind(tenant_id.to_string())
        .bind(&input.name)
        .bind(&input.resource)
        .bind(input.effect)
        .bind(&input.conditions)
        .bind(input.priority)
        .bind(input.source)
        .bind(&input.plugin_id)
        .execute(&self.pool)
        .await?;

        self.find_by_id(schema, tenant_id, id)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to create policy")))
    }

    async fn update(
        &self,
        schema: &str,
        tenant_id: Uuid,
        policy_id: Uuid,
        input: &UpdatePolicyInput,
    ) -> Result<Policy> {
        validate_schema_ref(schema)?;

        let existing = self
            .find_by_id(schema, tenant_id, policy_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Policy {} not found", policy_id)))?;

        let name = input.name.as_ref().unwrap_or(&existing.name);
        let conditions = input.conditions.as_ref().unwrap_or(&existing.conditions);
        let priority = input.priority.unwrap_or(existing.priority);
        let is_active = input.is_active.unwrap_or(existing.is_active);

        sqlx::query(&format!(
            r#"
            UPDATE `{schema}`.policies
            SET name = ?, conditions = ?, priority = ?, is_active = ?, updated_at = NOW()
            WHERE id = ? AND tenant_id = ?
            "#
        ))
        .bind(name)
        .bind(conditions)
        .bind(priority)
        .bind(is_active)
        .bind(policy_id.to_string())
        .bind(tenant_id.to_string())
        .execute(&self.pool)
        .await?;

        self.find_by_id(schema, tenant_id, policy_id)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to update policy")))
    }

    async fn delete(&self, schema: &str, tenant_id: Uuid, policy_id: Uuid) -> Result<()> {
        validate_schema_ref(schema)?;

        let result = sqlx::query(&format!(
            "DELETE FROM `{schema}`.policies WHERE id = ? AND tenant_id = ?"
        ))
        .bind(policy_id.to_string())
        .bind(tenant_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Policy {} not found",
                policy_id
            )));
        }

        Ok(())
    }
}
