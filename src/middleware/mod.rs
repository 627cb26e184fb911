//! HTTP middleware

pub mod rate_limit;

pub use rate_limit::{mutation_rate_guard_middleware, GuardOutcome, MutationRateGuard};
