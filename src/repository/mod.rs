//! Data access layer over the tenant-scoped MySQL schemas

pub mod policy;
pub mod rbac;

pub use policy::{PolicyRepository, PolicyRepositoryImpl};
pub use rbac::{RbacRepository, RbacRepositoryImpl};
