//! ABAC policy management and evaluation entry point

use crate::domain::{
    validate_schema_ref, CreatePolicyInput, Policy, RequestContext, UpdatePolicyInput,
};
use crate::error::{AppError, Result};
use crate::policy::{evaluate_policies, PolicyOutcome};
use crate::repository::PolicyRepository;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

pub struct PolicyService<P> {
    repo: Arc<P>,
}

impl<P: PolicyRepository> PolicyService<P> {
    pub fn new(repo: Arc<P>) -> Self {
        Self { repo }
    }

    pub async fn list_policies(&self, schema: &str, tenant_id: Uuid) -> Result<Vec<Policy>> {
        validate_schema_ref(schema)?;
        self.repo.list(schema, tenant_id).await
    }

    pub async fn get_policy(&self, schema: &str, tenant_id: Uuid, policy_id: Uuid) -> Result<Policy> {
        validate_schema_ref(schema)?;
        self.repo
            .find_by_id(schema, tenant_id, policy_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Policy {} not found", policy_id)))
    }

    pub async fn create_policy(
        &self,
        schema: &str,
        tenant_id: Uuid,
        input: CreatePolicyInput,
    ) -> Result<Policy> {
        validate_schema_ref(schema)?;
        input.validate()?;

        let policy = self.repo.create(schema, tenant_id, &input).await?;
        tracing::info!(%tenant_id, policy_id = %policy.id, resource = %policy.resource, "created policy");
        Ok(policy)
    }

    /// Core- and plugin-sourced policies are managed by their owners, not by
    /// tenant staff.
    pub async fn update_policy(
        &self,
        schema: &str,
        tenant_id: Uuid,
        policy_id: Uuid,
        input: UpdatePolicyInput,
    ) -> Result<Policy> {
        validate_schema_ref(schema)?;
        input.validate()?;

        let existing = self.get_policy(schema, tenant_id, policy_id).await?;
        if !existing.source.is_tenant_mutable() {
            return Err(AppError::PolicySourceImmutable(existing.name));
        }

        self.repo.update(schema, tenant_id, policy_id, &input).await
    }

    pub async fn delete_policy(&self, schema: &str, tenant_id: Uuid, policy_id: Uuid) -> Result<()> {
        validate_schema_ref(schema)?;

        let existing = self.get_policy(schema, tenant_id, policy_id).await?;
        if !existing.source.is_tenant_mutable() {
            return Err(AppError::PolicySourceImmutable(existing.name));
        }

        self.repo.delete(schema, tenant_id, policy_id).await?;
        tracing::info!(%tenant_id, %policy_id, "deleted policy");
        Ok(())
    }

    /// Evaluate the active policy overlay for one resource against the
    /// request's attribute document.
    pub async fn evaluate(
        &self,
        ctx: &RequestContext,
        resource: &str,
        attributes: &Value,
        is_super_admin: bool,
    ) -> Result<PolicyOutcome> {
        validate_schema_ref(&ctx.schema_ref)?;

        let policies = self
            .repo
            .find_active_by_resource(&ctx.schema_ref, ctx.tenant_id, resource)
            .await?;

        Ok(evaluate_policies(&policies, attributes, is_super_admin))
    }
}
