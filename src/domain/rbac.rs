//! RBAC (Role-Based Access Control) domain models

use super::common::StringUuid;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// System role names seeded for every tenant. These roles are immutable:
/// they cannot be renamed or deleted and their system flag cannot change.
pub const SUPER_ADMIN_ROLE: &str = "super_admin";
pub const TENANT_ADMIN_ROLE: &str = "tenant_admin";
pub const TEAM_ADMIN_ROLE: &str = "team_admin";
pub const USER_ROLE: &str = "user";

pub const SYSTEM_ROLES: [&str; 4] = [
    SUPER_ADMIN_ROLE,
    TENANT_ADMIN_ROLE,
    TEAM_ADMIN_ROLE,
    USER_ROLE,
];

/// Core permission catalog seeded for every tenant: (key, name).
pub const CORE_PERMISSIONS: [(&str, &str); 13] = [
    ("*:*", "All Capabilities"),
    ("users:read", "Read Users"),
    ("users:write", "Manage Users"),
    ("roles:read", "Read Roles"),
    ("roles:write", "Manage Roles"),
    ("workspaces:read", "Read Workspaces"),
    ("workspaces:write", "Manage Workspaces"),
    ("settings:read", "Read Settings"),
    ("settings:write", "Manage Settings"),
    ("plugins:manage", "Manage Plugins"),
    ("policies:read", "Read Policies"),
    ("policies:write", "Manage Policies"),
    ("audit:read", "Read Audit Trail"),
];

/// Default permission grants wired onto system roles at seeding time.
pub const DEFAULT_ROLE_GRANTS: [(&str, &[&str]); 4] = [
    (SUPER_ADMIN_ROLE, &["*:*"]),
    (
        TENANT_ADMIN_ROLE,
        &[
            "users:read",
            "users:write",
            "roles:read",
            "roles:write",
            "workspaces:read",
            "workspaces:write",
            "settings:read",
            "settings:write",
            "plugins:manage",
            "policies:read",
            "policies:write",
            "audit:read",
        ],
    ),
    (
        TEAM_ADMIN_ROLE,
        &["users:read", "roles:read", "workspaces:read", "workspaces:write"],
    ),
    (USER_ROLE, &["users:read", "workspaces:read"]),
];

/// Whether a role name belongs to the seeded system roles.
pub fn is_system_role(name: &str) -> bool {
    SYSTEM_ROLES.contains(&name)
}

/// Role entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Role {
    pub id: StringUuid,
    pub tenant_id: StringUuid,
    pub name: String,
    pub description: Option<String>,
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for Role {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: StringUuid::new_v4(),
            tenant_id: StringUuid::nil(),
            name: String::new(),
            description: None,
            is_system: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Permission entity. `plugin_id = None` marks a core permission; a value
/// marks exclusive ownership by that plugin.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Permission {
    pub id: StringUuid,
    pub tenant_id: StringUuid,
    /// Colon-delimited capability key (e.g., "users:read")
    #[sqlx(rename = "permission_key")]
    pub key: String,
    pub name: String,
    pub description: Option<String>,
    pub plugin_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Permission {
    /// Display name of the current owner, for conflict errors.
    pub fn owner(&self) -> String {
        self.plugin_id
            .clone()
            .unwrap_or_else(|| "core".to_string())
    }
}

impl Default for Permission {
    fn default() -> Self {
        Self {
            id: StringUuid::new_v4(),
            tenant_id: StringUuid::nil(),
            key: String::new(),
            name: String::new(),
            description: None,
            plugin_id: None,
            created_at: Utc::now(),
        }
    }
}

/// User-Role assignment, scoped by tenant
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserRole {
    pub user_id: StringUuid,
    pub role_id: StringUuid,
    pub tenant_id: StringUuid,
    pub assigned_at: DateTime<Utc>,
}

/// A permission declaration submitted during plugin or core registration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PermissionDefinition {
    #[validate(
        length(min = 3, max = 100),
        custom(function = "validate_permission_key")
    )]
    pub key: String,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub description: Option<String>,
}

/// Input for creating a role
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateRoleInput {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    pub description: Option<String>,
}

/// Input for updating a role
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateRoleInput {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Effective permission grants loaded from the store for one user, together
/// with the role IDs they flow from (needed for the cache reverse index).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserPermissionGrants {
    pub permissions: Vec<String>,
    pub role_ids: Vec<Uuid>,
}

/// Outcome of an authorization decision
#[derive(Debug, Clone, Serialize)]
pub struct AccessDecision {
    pub permitted: bool,
    pub checked_permissions: Vec<String>,
    pub user_permissions: Vec<String>,
    pub from_cache: bool,
}

impl AccessDecision {
    /// The decision returned whenever anything goes wrong: deny, with no
    /// capability details attached.
    pub fn denied(checked_permissions: Vec<String>) -> Self {
        Self {
            permitted: false,
            checked_permissions,
            user_permissions: Vec::new(),
            from_cache: false,
        }
    }
}

/// Self-service introspection view of a user's effective permissions.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EffectivePermissions {
    pub permissions: Vec<String>,
    /// The subset of `permissions` containing a wildcard segment
    pub wildcard_permissions: Vec<String>,
}

/// Validate a permission key (e.g., "users:read", "reports:export:pdf").
/// A `*` segment is allowed anywhere; system grants use it ("*:*").
fn validate_permission_key(key: &str) -> Result<(), validator::ValidationError> {
    if PERMISSION_KEY_REGEX.is_match(key) {
        Ok(())
    } else {
        Err(validator::ValidationError::new("invalid_permission_key"))
    }
}

/// Validate a tenant schema reference before it is interpolated into a
/// schema-qualified query. Strict identifier pattern, no quoting tricks.
pub fn validate_schema_ref(schema_ref: &str) -> crate::error::Result<()> {
    if SCHEMA_REF_REGEX.is_match(schema_ref) {
        Ok(())
    } else {
        Err(crate::error::AppError::Validation(
            "invalid schema reference".to_string(),
        ))
    }
}

lazy_static::lazy_static! {
    pub static ref PERMISSION_KEY_REGEX: regex::Regex =
        regex::Regex::new(r"^([a-z][a-z0-9_]*|\*)(?::([a-z][a-z0-9_]*|\*))+$").unwrap();

    pub static ref SCHEMA_REF_REGEX: regex::Regex =
        regex::Regex::new(r"^[a-z][a-z0-9_]{0,62}$").unwrap();
}
