//! ABAC policy evaluation

pub mod abac;

pub use abac::{eval_condition, evaluate_policies, PolicyOutcome};
