//! Verdict Core - Multi-tenant Authorization Decision Engine
//!
//! This crate provides the authorization subsystem consumed in-process by the
//! request pipeline: an RBAC decision service with an advisory Redis cache,
//! a transactional permission registration path for core and plugin
//! capabilities, a deny/filter-only ABAC policy overlay, and a rate guard
//! for authorization-mutation endpoints.

pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod middleware;
pub mod policy;
pub mod repository;
pub mod service;
pub mod state;
pub mod telemetry;

// Re-export commonly used types
pub use config::Config;
pub use error::{AppError, Result};
