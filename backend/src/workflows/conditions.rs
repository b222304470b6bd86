// Workflow Conditions - Boolean checks over the execution context

use automation_shared::ContextData;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use tracing::warn;

/// Decides whether a condition tree holds for a context.
///
/// The tree is opaque to the engine. Implementations must be pure: no I/O and
/// no blocking, since they run inline on the matcher and runner paths.
#[cfg_attr(test, mockall::automock)]
pub trait ConditionEvaluator: Send + Sync {
    fn evaluate(&self, conditions: &Value, context: &ContextData) -> bool;
}

/// True for trees that impose no constraint, so callers can skip evaluation.
pub fn is_blank(conditions: &Value) -> bool {
    match conditions {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => {
            map.is_empty()
                || (!map.contains_key("field")
                    && map.get("conditions").is_none_or(is_blank)
                    && map.get("groups").is_none_or(is_blank))
        }
        _ => false,
    }
}

/// A single condition to evaluate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    /// Field name to evaluate (supports dot notation for nested fields)
    pub field: String,
    pub operator: String,
    #[serde(default)]
    pub value: Value,
}

/// Group of conditions with AND/OR logic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionGroup {
    /// "and" or "or", case-insensitive
    #[serde(default = "default_logic")]
    pub logic: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Nested condition groups for complex logic
    #[serde(default)]
    pub groups: Vec<ConditionGroup>,
}

fn default_logic() -> String {
    "and".to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    // Equality
    Equals,
    NotEquals,

    // String operations
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    Regex,

    // Numeric comparisons
    GreaterThan,
    GreaterThanOrEquals,
    LessThan,
    LessThanOrEquals,

    // Array operations
    In,
    NotIn,

    // Null/Empty checks
    IsNull,
    IsNotNull,
    IsEmpty,
    IsNotEmpty,

    // Boolean
    IsTrue,
    IsFalse,
}

impl ConditionOperator {
    pub fn parse(operator: &str) -> Option<Self> {
        let op = match operator.trim().to_ascii_lowercase().as_str() {
            "equals" | "eq" | "==" => Self::Equals,
            "not_equals" | "ne" | "!=" => Self::NotEquals,
            "contains" => Self::Contains,
            "not_contains" => Self::NotContains,
            "starts_with" => Self::StartsWith,
            "ends_with" => Self::EndsWith,
            "regex" | "matches" => Self::Regex,
            "greater_than" | "gt" | ">" => Self::GreaterThan,
            "greater_than_or_equals" | "gte" | ">=" => Self::GreaterThanOrEquals,
            "less_than" | "lt" | "<" => Self::LessThan,
            "less_than_or_equals" | "lte" | "<=" => Self::LessThanOrEquals,
            "in" => Self::In,
            "not_in" => Self::NotIn,
            "is_null" => Self::IsNull,
            "is_not_null" => Self::IsNotNull,
            "is_empty" => Self::IsEmpty,
            "is_not_empty" => Self::IsNotEmpty,
            "is_true" => Self::IsTrue,
            "is_false" => Self::IsFalse,
            _ => return None,
        };
        Some(op)
    }
}

impl Condition {
    pub fn new(field: &str, operator: &str, value: Value) -> Self {
        Self {
            field: field.to_string(),
            operator: operator.to_string(),
            value,
        }
    }

    pub fn equals(field: &str, value: Value) -> Self {
        Self::new(field, "equals", value)
    }

    pub fn not_equals(field: &str, value: Value) -> Self {
        Self::new(field, "not_equals", value)
    }

    pub fn contains(field: &str, value: &str) -> Self {
        Self::new(field, "contains", Value::String(value.to_string()))
    }

    pub fn greater_than(field: &str, value: f64) -> Self {
        Self::new(field, "greater_than", serde_json::json!(value))
    }

    pub fn less_than(field: &str, value: f64) -> Self {
        Self::new(field, "less_than", serde_json::json!(value))
    }

    pub fn is_null(field: &str) -> Self {
        Self::new(field, "is_null", Value::Null)
    }

    pub fn in_list(field: &str, values: Vec<Value>) -> Self {
        Self::new(field, "in", Value::Array(values))
    }

    pub fn regex(field: &str, pattern: &str) -> Self {
        Self::new(field, "regex", Value::String(pattern.to_string()))
    }
}

impl ConditionGroup {
    pub fn and(conditions: Vec<Condition>) -> Self {
        Self {
            logic: "and".to_string(),
            conditions,
            groups: Vec::new(),
        }
    }

    pub fn or(conditions: Vec<Condition>) -> Self {
        Self {
            logic: "or".to_string(),
            conditions,
            groups: Vec::new(),
        }
    }

    pub fn with_nested_group(mut self, group: ConditionGroup) -> Self {
        self.groups.push(group);
        self
    }

    pub fn add_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Default evaluator for `{logic, conditions, groups}` trees.
///
/// Accepted shapes: null or empty (always true), a bare array of conditions
/// (AND), a single `{field, operator, value}` object, or a group object.
/// Malformed trees and unknown operators evaluate to false.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonConditionEvaluator;

impl JsonConditionEvaluator {
    pub fn new() -> Self {
        Self
    }

    fn evaluate_group(&self, group: &ConditionGroup, context: &ContextData) -> bool {
        let mut results = group
            .conditions
            .iter()
            .map(|c| self.evaluate_condition(c, context))
            .chain(group.groups.iter().map(|g| self.evaluate_group(g, context)));

        match group.logic.to_ascii_lowercase().as_str() {
            "or" => results.any(|r| r),
            _ => results.all(|r| r),
        }
    }

    fn evaluate_condition(&self, condition: &Condition, context: &ContextData) -> bool {
        let Some(operator) = ConditionOperator::parse(&condition.operator) else {
            warn!("Unknown condition operator '{}' on field '{}'", condition.operator, condition.field);
            return false;
        };

        let field_value = lookup(context, &condition.field).filter(|v| !v.is_null());
        let expected = &condition.value;

        match operator {
            ConditionOperator::Equals => field_value.is_some_and(|v| loose_eq(v, expected)),
            ConditionOperator::NotEquals => !field_value.is_some_and(|v| loose_eq(v, expected)),
            ConditionOperator::Contains => field_value.is_some_and(|v| contains(v, expected)),
            ConditionOperator::NotContains => !field_value.is_some_and(|v| contains(v, expected)),
            ConditionOperator::StartsWith => string_pair(field_value, expected)
                .is_some_and(|(s, p)| s.to_lowercase().starts_with(&p.to_lowercase())),
            ConditionOperator::EndsWith => string_pair(field_value, expected)
                .is_some_and(|(s, p)| s.to_lowercase().ends_with(&p.to_lowercase())),
            ConditionOperator::Regex => string_pair(field_value, expected).is_some_and(|(s, p)| {
                match Regex::new(p) {
                    Ok(re) => re.is_match(s),
                    Err(e) => {
                        warn!("Invalid regex in condition on '{}': {}", condition.field, e);
                        false
                    }
                }
            }),
            ConditionOperator::GreaterThan => compare(field_value, expected) == Some(Ordering::Greater),
            ConditionOperator::GreaterThanOrEquals => {
                matches!(compare(field_value, expected), Some(Ordering::Greater | Ordering::Equal))
            }
            ConditionOperator::LessThan => compare(field_value, expected) == Some(Ordering::Less),
            ConditionOperator::LessThanOrEquals => {
                matches!(compare(field_value, expected), Some(Ordering::Less | Ordering::Equal))
            }
            ConditionOperator::In => field_value.is_some_and(|v| in_list(v, expected)),
            ConditionOperator::NotIn => !field_value.is_some_and(|v| in_list(v, expected)),
            ConditionOperator::IsNull => field_value.is_none(),
            ConditionOperator::IsNotNull => field_value.is_some(),
            ConditionOperator::IsEmpty => field_value.is_none_or(is_empty_value),
            ConditionOperator::IsNotEmpty => !field_value.is_none_or(is_empty_value),
            ConditionOperator::IsTrue => field_value == Some(&Value::Bool(true)),
            ConditionOperator::IsFalse => field_value == Some(&Value::Bool(false)),
        }
    }
}

impl ConditionEvaluator for JsonConditionEvaluator {
    fn evaluate(&self, conditions: &Value, context: &ContextData) -> bool {
        if is_blank(conditions) {
            return true;
        }

        match conditions {
            Value::Bool(b) => *b,
            Value::Array(_) => match serde_json::from_value::<Vec<Condition>>(conditions.clone()) {
                Ok(list) => self.evaluate_group(&ConditionGroup::and(list), context),
                Err(e) => {
                    warn!("Malformed condition list: {}", e);
                    false
                }
            },
            Value::Object(map) if map.contains_key("field") => {
                match serde_json::from_value::<Condition>(conditions.clone()) {
                    Ok(condition) => self.evaluate_condition(&condition, context),
                    Err(e) => {
                        warn!("Malformed condition: {}", e);
                        false
                    }
                }
            }
            Value::Object(_) => match serde_json::from_value::<ConditionGroup>(conditions.clone()) {
                Ok(group) => self.evaluate_group(&group, context),
                Err(e) => {
                    warn!("Malformed condition group: {}", e);
                    false
                }
            },
            _ => false,
        }
    }
}

/// Resolve a dot path such as `client.tier` or `items.0.sku` in the context.
/// A literal key containing dots wins over path traversal.
pub fn lookup<'a>(context: &'a ContextData, path: &str) -> Option<&'a Value> {
    if let Some(value) = context.get(path) {
        return Some(value);
    }

    let mut parts = path.split('.');
    let mut current = context.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

pub(crate) fn loose_eq(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    match (as_number(actual), as_number(expected)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn contains(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::String(s), Value::String(p)) => s.to_lowercase().contains(&p.to_lowercase()),
        (Value::Array(items), needle) => items.iter().any(|item| loose_eq(item, needle)),
        _ => false,
    }
}

fn in_list(actual: &Value, expected: &Value) -> bool {
    match expected {
        Value::Array(items) => items.iter().any(|item| loose_eq(actual, item)),
        _ => false,
    }
}

fn string_pair<'a>(actual: Option<&'a Value>, expected: &'a Value) -> Option<(&'a str, &'a str)> {
    Some((actual?.as_str()?, expected.as_str()?))
}

/// Numeric when both sides are numbers, otherwise plain string order (ISO dates sort correctly).
fn compare(actual: Option<&Value>, expected: &Value) -> Option<Ordering> {
    let actual = actual?;
    if let (Some(a), Some(b)) = (as_number(actual), as_number(expected)) {
        return a.partial_cmp(&b);
    }
    match (actual, expected) {
        (Value::String(a), Value::String(b)) => Some(a.as_str().cmp(b.as_str())),
        _ => None,
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> ContextData {
        json!({
            "priority": "high",
            "amount": 1250.5,
            "score": "42",
            "tags": ["vip", "renewal"],
            "client": {"tier": "gold", "is_vip": true},
            "closed_at": null,
            "notes": "",
            "subject": "Invoice overdue for ACME",
            "created": "2026-03-01"
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    fn check(condition: Condition) -> bool {
        JsonConditionEvaluator.evaluate(&serde_json::to_value(condition).unwrap(), &context())
    }

    #[test]
    fn test_blank_conditions_pass() {
        let eval = JsonConditionEvaluator;
        assert!(eval.evaluate(&Value::Null, &context()));
        assert!(eval.evaluate(&json!([]), &context()));
        assert!(eval.evaluate(&json!({}), &context()));
        assert!(eval.evaluate(&json!({"logic": "and", "conditions": []}), &context()));
    }

    #[test]
    fn test_equality_and_numbers() {
        assert!(check(Condition::equals("priority", json!("high"))));
        assert!(check(Condition::not_equals("priority", json!("low"))));
        assert!(check(Condition::equals("score", json!(42))));
        assert!(check(Condition::greater_than("amount", 1000.0)));
        assert!(!check(Condition::less_than("amount", 1000.0)));
        assert!(check(Condition::new("amount", ">=", json!(1250.5))));
    }

    #[test]
    fn test_string_operators_ignore_case() {
        assert!(check(Condition::contains("subject", "acme")));
        assert!(check(Condition::new("subject", "starts_with", json!("invoice"))));
        assert!(check(Condition::new("subject", "ends_with", json!("ACME"))));
        assert!(check(Condition::new("subject", "not_contains", json!("refund"))));
        assert!(check(Condition::regex("subject", r"^Invoice\s+\w+")));
        assert!(!check(Condition::regex("subject", r"(unclosed")));
    }

    #[test]
    fn test_nested_paths_and_lists() {
        assert!(check(Condition::equals("client.tier", json!("gold"))));
        assert!(check(Condition::new("client.is_vip", "is_true", Value::Null)));
        assert!(check(Condition::equals("tags.0", json!("vip"))));
        assert!(check(Condition::contains("tags", "renewal")));
        assert!(check(Condition::in_list("priority", vec![json!("critical"), json!("high")])));
        assert!(check(Condition::new("priority", "not_in", json!(["low"]))));
    }

    #[test]
    fn test_null_and_empty() {
        assert!(check(Condition::is_null("closed_at")));
        assert!(check(Condition::is_null("missing.deeply")));
        assert!(check(Condition::new("notes", "is_empty", Value::Null)));
        assert!(check(Condition::new("tags", "is_not_empty", Value::Null)));
        assert!(check(Condition::new("priority", "is_not_null", Value::Null)));
    }

    #[test]
    fn test_dates_compare_as_strings() {
        assert!(check(Condition::new("created", "less_than", json!("2026-04-01"))));
    }

    #[test]
    fn test_unknown_operator_is_false() {
        assert!(!check(Condition::new("priority", "sounds_like", json!("hi"))));
    }

    #[test]
    fn test_nested_groups() {
        let inner = ConditionGroup::or(vec![
            Condition::equals("priority", json!("critical")),
            Condition::equals("client.tier", json!("gold")),
        ]);
        let outer = ConditionGroup::and(vec![Condition::greater_than("amount", 100.0)])
            .with_nested_group(inner);

        assert!(JsonConditionEvaluator.evaluate(&outer.to_value(), &context()));

        let failing = ConditionGroup::and(vec![Condition::is_null("priority")])
            .with_nested_group(ConditionGroup::or(vec![]));
        assert!(!JsonConditionEvaluator.evaluate(&failing.to_value(), &context()));
    }

    #[test]
    fn test_bare_list_is_and() {
        let list = json!([
            {"field": "priority", "operator": "equals", "value": "high"},
            {"field": "amount", "operator": "lt", "value": 10}
        ]);
        assert!(!JsonConditionEvaluator.evaluate(&list, &context()));
    }

    #[test]
    fn test_malformed_tree_is_false() {
        assert!(!JsonConditionEvaluator.evaluate(&json!({"conditions": "nope"}), &context()));
        assert!(!JsonConditionEvaluator.evaluate(&json!(17), &context()));
    }

    #[test]
    fn test_is_blank() {
        assert!(is_blank(&json!({"logic": "or", "conditions": [], "groups": []})));
        assert!(!is_blank(&json!({"field": "a", "operator": "is_null"})));
        assert!(!is_blank(&json!(false)));
    }
}
