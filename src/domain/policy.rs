//! ABAC policy domain models
//!
//! Policies are a deny/filter-only overlay evaluated after RBAC: they can
//! narrow access but never grant it. `PolicyEffect` has no Allow variant by
//! construction.

use super::common::StringUuid;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Serialized condition trees are capped to bound evaluation cost and
/// prevent storage abuse.
pub const MAX_CONDITION_BYTES: usize = 64 * 1024;

/// Policy effect: deny an otherwise-granted action, or filter a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum PolicyEffect {
    Deny,
    Filter,
}

/// Who authored a policy. Core- and plugin-sourced policies are immutable
/// by tenant staff; admin-sourced rows are mutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PolicySource {
    Core,
    Plugin,
    SuperAdmin,
    TenantAdmin,
}

impl PolicySource {
    /// Whether tenant staff may update or delete a policy with this source.
    pub fn is_tenant_mutable(&self) -> bool {
        matches!(self, PolicySource::TenantAdmin | PolicySource::SuperAdmin)
    }
}

/// Recursively nested boolean condition tree. Composite nodes are AND/OR/NOT;
/// leaves compare one context attribute against a value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionTree {
    All { all: Vec<ConditionTree> },
    Any { any: Vec<ConditionTree> },
    Not { not: Box<ConditionTree> },
    Predicate {
        attribute: String,
        operator: String,
        #[serde(default)]
        value: serde_json::Value,
    },
}

/// ABAC policy entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Policy {
    pub id: StringUuid,
    pub tenant_id: StringUuid,
    pub name: String,
    /// Resource the policy applies to (e.g., "workspaces")
    pub resource: String,
    pub effect: PolicyEffect,
    /// Serialized `ConditionTree`; parsed lazily at evaluation time so a
    /// malformed stored tree degrades to a non-match instead of an error.
    pub conditions: serde_json::Value,
    pub priority: i32,
    pub source: PolicySource,
    pub plugin_id: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for Policy {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: StringUuid::new_v4(),
            tenant_id: StringUuid::nil(),
            name: String::new(),
            resource: String::new(),
            effect: PolicyEffect::Deny,
            conditions: serde_json::Value::Null,
            priority: 0,
            source: PolicySource::TenantAdmin,
            plugin_id: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Input for creating a policy
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreatePolicyInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(min = 1, max = 100))]
    pub resource: String,
    pub effect: PolicyEffect,
    #[validate(custom(function = "validate_condition_size"))]
    pub conditions: serde_json::Value,
    #[serde(default)]
    pub priority: i32,
    pub source: PolicySource,
    pub plugin_id: Option<String>,
}

/// Input for updating a policy
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdatePolicyInput {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    #[validate(custom(function = "validate_condition_size"))]
    pub conditions: Option<serde_json::Value>,
    pub priority: Option<i32>,
    pub is_active: Option<bool>,
}

/// Enforce the serialized-size cap and require that the tree actually parses
/// as a `ConditionTree`.
fn validate_condition_size(value: &serde_json::Value) -> Result<(), validator::ValidationError> {
    let serialized = value.to_string();
    if serialized.len() > MAX_CONDITION_BYTES {
        return Err(validator::ValidationError::new("conditions_too_large"));
    }
    if serde_json::from_value::<ConditionTree>(value.clone()).is_err() {
        return Err(validator::ValidationError::new("conditions_malformed"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_condition_tree_parses_nested_composites() {
        let tree: ConditionTree = serde_json::from_value(json!({
            "all": [
                { "attribute": "workspace.owner_id", "operator": "eq", "value": "u1" },
                { "any": [
                    { "attribute": "user.department", "operator": "in", "value": ["eng", "ops"] },
                    { "not": { "attribute": "user.contractor", "operator": "eq", "value": true } }
                ]}
            ]
        }))
        .unwrap();

        match tree {
            ConditionTree::All { all } => assert_eq!(all.len(), 2),
            _ => panic!("expected All node"),
        }
    }

    #[test]
    fn test_condition_tree_rejects_unknown_shape() {
        let result: Result<ConditionTree, _> =
            serde_json::from_value(json!({ "unexpected": true }));
        assert!(result.is_err());
    }

    #[test]
    fn test_create_policy_input_size_cap() {
        let big_value = "x".repeat(MAX_CONDITION_BYTES);
        let input = CreatePolicyInput {
            name: "oversized".to_string(),
            resource: "workspaces".to_string(),
            effect: PolicyEffect::Deny,
            conditions: json!({ "attribute": "a", "operator": "eq", "value": big_value }),
            priority: 0,
            source: PolicySource::TenantAdmin,
            plugin_id: None,
        };
        assert!(input.validate().is_err());
    }

    #[test]
    fn test_create_policy_input_valid() {
        let input = CreatePolicyInput {
            name: "deny contractors".to_string(),
            resource: "workspaces".to_string(),
            effect: PolicyEffect::Deny,
            conditions: json!({ "attribute": "user.contractor", "operator": "eq", "value": true }),
            priority: 10,
            source: PolicySource::TenantAdmin,
            plugin_id: None,
        };
        assert!(input.validate().is_ok());
    }

    #[test]
    fn test_create_policy_input_malformed_conditions() {
        let input = CreatePolicyInput {
            name: "broken".to_string(),
            resource: "workspaces".to_string(),
            effect: PolicyEffect::Filter,
            conditions: json!({ "nonsense": 1 }),
            priority: 0,
            source: PolicySource::TenantAdmin,
            plugin_id: None,
        };
        assert!(input.validate().is_err());
    }

    #[test]
    fn test_policy_source_mutability() {
        assert!(!PolicySource::Core.is_tenant_mutable());
        assert!(!PolicySource::Plugin.is_tenant_mutable());
        assert!(PolicySource::TenantAdmin.is_tenant_mutable());
        assert!(PolicySource::SuperAdmin.is_tenant_mutable());
    }

    #[test]
    fn test_policy_effect_serde_uppercase() {
        assert_eq!(serde_json::to_string(&PolicyEffect::Deny).unwrap(), "\"DENY\"");
        assert_eq!(
            serde_json::to_string(&PolicyEffect::Filter).unwrap(),
            "\"FILTER\""
        );
        let effect: PolicyEffect = serde_json::from_str("\"DENY\"").unwrap();
        assert_eq!(effect, PolicyEffect::Deny);
    }
}
