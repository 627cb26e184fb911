//! Attribute-based condition evaluation
//!
//! Policies run as an overlay after the RBAC check: a DENY policy whose
//! condition matches overturns an otherwise-granted action; FILTER policies
//! whose conditions match are handed back to the caller to narrow result
//! sets. Policies never grant access.

use crate::domain::{ConditionTree, Policy, PolicyEffect};
use serde_json::Value;
use std::cmp::Reverse;

/// Outcome of evaluating the policy overlay for one decision.
#[derive(Debug, Clone, Default)]
pub struct PolicyOutcome {
    /// Name of the highest-priority DENY policy that matched, if any.
    pub denied_by: Option<String>,
    /// Matching FILTER policies, highest priority first. The caller applies
    /// their conditions to its result set.
    pub filters: Vec<Policy>,
}

impl PolicyOutcome {
    pub fn is_denied(&self) -> bool {
        self.denied_by.is_some()
    }
}

/// Evaluate the active policies for a resource against the request's
/// attribute document. Super admins bypass the overlay entirely.
///
/// Policies are walked in descending priority; the first matching DENY wins
/// and evaluation stops. A stored condition tree that fails to parse is
/// treated as non-matching.
pub fn evaluate_policies(policies: &[Policy], attributes: &Value, is_super_admin: bool) -> PolicyOutcome {
    if is_super_admin {
        return PolicyOutcome::default();
    }

    let mut ordered: Vec<&Policy> = policies.iter().collect();
    ordered.sort_by_key(|p| Reverse(p.priority));

    let mut outcome = PolicyOutcome::default();
    for policy in ordered {
        let tree = match serde_json::from_value::<ConditionTree>(policy.conditions.clone()) {
            Ok(tree) => tree,
            Err(e) => {
                tracing::warn!(
                    policy_id = %policy.id,
                    error = %e,
                    "unparsable policy conditions, treating as non-matching"
                );
                continue;
            }
        };

        if !eval_condition(&tree, attributes) {
            continue;
        }

        match policy.effect {
            PolicyEffect::Deny => {
                outcome.denied_by = Some(policy.name.clone());
                return outcome;
            }
            PolicyEffect::Filter => outcome.filters.push(policy.clone()),
        }
    }

    outcome
}

/// Recursively evaluate a condition tree against an attribute document.
pub fn eval_condition(tree: &ConditionTree, attributes: &Value) -> bool {
    match tree {
        ConditionTree::All { all } => all.iter().all(|node| eval_condition(node, attributes)),
        ConditionTree::Any { any } => any.iter().any(|node| eval_condition(node, attributes)),
        ConditionTree::Not { not } => !eval_condition(not, attributes),
        ConditionTree::Predicate {
            attribute,
            operator,
            value,
        } => eval_predicate(attributes, attribute, operator, value),
    }
}

/// Resolve a dotted attribute path ("user.department") within the document.
fn lookup<'a>(attributes: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = attributes;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn eval_predicate(attributes: &Value, attribute: &str, operator: &str, expected: &Value) -> bool {
    let actual = lookup(attributes, attribute);

    match operator {
        "exists" => actual.is_some(),
        _ => {
            let Some(actual) = actual else {
                // An absent attribute matches nothing except `exists`.
                return false;
            };
            match operator {
                "eq" => actual == expected,
                "neq" => actual != expected,
                "contains" => match (actual, expected) {
                    (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
                    (Value::Array(items), needle) => items.contains(needle),
                    _ => false,
                },
                "starts_with" => match (actual, expected) {
                    (Value::String(s), Value::String(prefix)) => s.starts_with(prefix.as_str()),
                    _ => false,
                },
                "in" => match expected {
                    Value::Array(options) => options.contains(actual),
                    _ => false,
                },
                "not_in" => match expected {
                    Value::Array(options) => !options.contains(actual),
                    _ => false,
                },
                "gt" => compare_numbers(actual, expected, |a, b| a > b),
                "gte" => compare_numbers(actual, expected, |a, b| a >= b),
                "lt" => compare_numbers(actual, expected, |a, b| a < b),
                "lte" => compare_numbers(actual, expected, |a, b| a <= b),
                _ => {
                    tracing::warn!(operator, "unknown policy operator, treating as non-matching");
                    false
                }
            }
        }
    }
}

fn compare_numbers(actual: &Value, expected: &Value, cmp: fn(f64, f64) -> bool) -> bool {
    match (actual.as_f64(), expected.as_f64()) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PolicySource;
    use serde_json::json;

    fn attrs() -> Value {
        json!({
            "user": {
                "id": "u1",
                "department": "eng",
                "contractor": false,
                "clearance": 3
            },
            "workspace": {
                "owner_id": "u2",
                "visibility": "private"
            }
        })
    }

    fn predicate(attribute: &str, operator: &str, value: Value) -> ConditionTree {
        ConditionTree::Predicate {
            attribute: attribute.to_string(),
            operator: operator.to_string(),
            value,
        }
    }

    fn deny_policy(name: &str, priority: i32, conditions: Value) -> Policy {
        Policy {
            name: name.to_string(),
            resource: "workspaces".to_string(),
            effect: PolicyEffect::Deny,
            conditions,
            priority,
            source: PolicySource::TenantAdmin,
            ..Policy::default()
        }
    }

    fn filter_policy(name: &str, priority: i32, conditions: Value) -> Policy {
        Policy {
            effect: PolicyEffect::Filter,
            ..deny_policy(name, priority, conditions)
        }
    }

    #[test]
    fn test_eq_and_neq() {
        let a = attrs();
        assert!(eval_condition(&predicate("user.department", "eq", json!("eng")), &a));
        assert!(!eval_condition(&predicate("user.department", "eq", json!("ops")), &a));
        assert!(eval_condition(&predicate("user.department", "neq", json!("ops")), &a));
    }

    #[test]
    fn test_numeric_comparisons() {
        let a = attrs();
        assert!(eval_condition(&predicate("user.clearance", "gt", json!(2)), &a));
        assert!(eval_condition(&predicate("user.clearance", "gte", json!(3)), &a));
        assert!(!eval_condition(&predicate("user.clearance", "lt", json!(3)), &a));
        assert!(eval_condition(&predicate("user.clearance", "lte", json!(3)), &a));
        // Non-numeric operands never satisfy an ordering comparison.
        assert!(!eval_condition(&predicate("user.department", "gt", json!(1)), &a));
    }

    #[test]
    fn test_membership_operators() {
        let a = attrs();
        assert!(eval_condition(
            &predicate("user.department", "in", json!(["eng", "ops"])),
            &a
        ));
        assert!(eval_condition(
            &predicate("user.department", "not_in", json!(["sales"])),
            &a
        ));
        assert!(!eval_condition(&predicate("user.department", "in", json!("eng")), &a));
    }

    #[test]
    fn test_string_operators() {
        let a = attrs();
        assert!(eval_condition(&predicate("workspace.visibility", "contains", json!("riv")), &a));
        assert!(eval_condition(
            &predicate("workspace.visibility", "starts_with", json!("pri")),
            &a
        ));
        assert!(!eval_condition(
            &predicate("workspace.visibility", "starts_with", json!("pub")),
            &a
        ));
    }

    #[test]
    fn test_exists_and_absent_attributes() {
        let a = attrs();
        assert!(eval_condition(&predicate("user.department", "exists", Value::Null), &a));
        assert!(!eval_condition(&predicate("user.missing", "exists", Value::Null), &a));
        // Absent attribute fails every other operator, including neq.
        assert!(!eval_condition(&predicate("user.missing", "neq", json!("x")), &a));
    }

    #[test]
    fn test_nested_composites() {
        let a = attrs();
        let tree = ConditionTree::All {
            all: vec![
                predicate("user.department", "eq", json!("eng")),
                ConditionTree::Any {
                    any: vec![
                        predicate("user.contractor", "eq", json!(true)),
                        ConditionTree::Not {
                            not: Box::new(predicate("workspace.visibility", "eq", json!("public"))),
                        },
                    ],
                },
            ],
        };
        assert!(eval_condition(&tree, &a));
    }

    #[test]
    fn test_unknown_operator_is_non_matching() {
        let a = attrs();
        assert!(!eval_condition(&predicate("user.department", "regex", json!(".*")), &a));
    }

    #[test]
    fn test_matching_deny_wins_over_lower_priority_filter() {
        let policies = vec![
            filter_policy(
                "own only",
                5,
                json!({ "attribute": "user.department", "operator": "eq", "value": "eng" }),
            ),
            deny_policy(
                "no contractors",
                10,
                json!({ "attribute": "user.contractor", "operator": "eq", "value": false }),
            ),
        ];

        let outcome = evaluate_policies(&policies, &attrs(), false);
        assert_eq!(outcome.denied_by.as_deref(), Some("no contractors"));
        // Evaluation stops at the deny; the filter is not collected.
        assert!(outcome.filters.is_empty());
    }

    #[test]
    fn test_non_matching_deny_collects_filters() {
        let policies = vec![
            deny_policy(
                "no contractors",
                10,
                json!({ "attribute": "user.contractor", "operator": "eq", "value": true }),
            ),
            filter_policy(
                "department scope",
                5,
                json!({ "attribute": "user.department", "operator": "eq", "value": "eng" }),
            ),
        ];

        let outcome = evaluate_policies(&policies, &attrs(), false);
        assert!(!outcome.is_denied());
        assert_eq!(outcome.filters.len(), 1);
        assert_eq!(outcome.filters[0].name, "department scope");
    }

    #[test]
    fn test_super_admin_bypasses_overlay() {
        let policies = vec![deny_policy(
            "deny everyone",
            10,
            json!({ "attribute": "user.id", "operator": "exists", "value": null }),
        )];

        let outcome = evaluate_policies(&policies, &attrs(), true);
        assert!(!outcome.is_denied());
        assert!(outcome.filters.is_empty());
    }

    #[test]
    fn test_malformed_conditions_skip_the_policy() {
        let policies = vec![
            deny_policy("broken", 10, json!({ "bogus": 1 })),
            deny_policy(
                "valid",
                5,
                json!({ "attribute": "user.department", "operator": "eq", "value": "eng" }),
            ),
        ];

        let outcome = evaluate_policies(&policies, &attrs(), false);
        assert_eq!(outcome.denied_by.as_deref(), Some("valid"));
    }

    #[test]
    fn test_priority_orders_evaluation() {
        // Two matching denies: the higher priority one must be reported.
        let policies = vec![
            deny_policy(
                "low",
                1,
                json!({ "attribute": "user.id", "operator": "exists", "value": null }),
            ),
            deny_policy(
                "high",
                100,
                json!({ "attribute": "user.id", "operator": "exists", "value": null }),
            ),
        ];

        let outcome = evaluate_policies(&policies, &attrs(), false);
        assert_eq!(outcome.denied_by.as_deref(), Some("high"));
    }
}
