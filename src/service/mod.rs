//! Service layer: orchestration between repositories and the cache

pub mod authorization;
pub mod policy;
pub mod registration;
pub mod role;

pub use authorization::{has_super_admin_role, matches_permission, AuthorizationService};
pub use policy::PolicyService;
pub use registration::PermissionRegistry;
pub use role::RoleService;
