//! Domain models and validation for the authorization engine

pub mod common;
pub mod context;
pub mod policy;
pub mod rbac;

pub use common::StringUuid;
pub use context::RequestContext;
pub use policy::{
    ConditionTree, CreatePolicyInput, Policy, PolicyEffect, PolicySource, UpdatePolicyInput,
    MAX_CONDITION_BYTES,
};
pub use rbac::{
    is_system_role, validate_schema_ref, AccessDecision, CreateRoleInput, EffectivePermissions,
    Permission, PermissionDefinition, Role, UpdateRoleInput, UserPermissionGrants, UserRole,
    CORE_PERMISSIONS, DEFAULT_ROLE_GRANTS, SUPER_ADMIN_ROLE, SYSTEM_ROLES, TEAM_ADMIN_ROLE,
    TENANT_ADMIN_ROLE, USER_ROLE,
};
