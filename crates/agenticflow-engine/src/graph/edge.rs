use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use agenticflow_core::types::DataMap;

/// A directed edge between two contexts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Source context id.
    pub from: String,
    /// Target context id.
    pub to: String,
    /// Condition that must hold to traverse this edge.
    #[serde(default)]
    pub condition: EdgeCondition,
}

/// Condition for traversing an edge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EdgeCondition {
    /// Always traverse this edge.
    #[default]
    Always,
    /// Traverse if the expression holds over the accumulated data.
    /// Supported: `key == "value"`, `key != "value"`,
    /// `key contains "substr"`, `key exists`.
    Conditional { expr: String },
}

impl Edge {
    /// Create an unconditional edge.
    pub fn always(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: EdgeCondition::Always,
        }
    }

    /// Create a conditional edge.
    pub fn conditional(
        from: impl Into<String>,
        to: impl Into<String>,
        expr: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: EdgeCondition::Conditional { expr: expr.into() },
        }
    }

    pub fn is_self_loop(&self) -> bool {
        self.from == self.to
    }

    /// Whether the edge may be followed given the accumulated data.
    pub fn is_traversable(&self, data: &DataMap) -> bool {
        match &self.condition {
            EdgeCondition::Always => true,
            EdgeCondition::Conditional { expr } => evaluate_condition(expr, data),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Operator {
    Equals,
    NotEquals,
    Contains,
    Exists,
}

/// A parsed condition expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    key: String,
    op: Operator,
    operand: String,
}

fn condition_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"^\s*([A-Za-z_][\w.\-]*)\s*(==|!=|\bcontains\b|\bexists\b)\s*(?:"([^"]*)"|(\S+))?\s*$"#)
            .expect("condition pattern is a valid regex")
    })
}

impl Condition {
    /// Parse an expression. Returns `None` for anything unsupported.
    pub fn parse(expr: &str) -> Option<Self> {
        let caps = condition_pattern().captures(expr)?;
        let key = caps.get(1)?.as_str().to_string();
        let operand = caps
            .get(3)
            .or_else(|| caps.get(4))
            .map(|m| m.as_str().to_string());

        let op = match caps.get(2)?.as_str() {
            "==" => Operator::Equals,
            "!=" => Operator::NotEquals,
            "contains" => Operator::Contains,
            _ => Operator::Exists,
        };

        match (op, operand) {
            (Operator::Exists, None) => Some(Self {
                key,
                op,
                operand: String::new(),
            }),
            (Operator::Exists, Some(_)) | (_, None) => None,
            (_, Some(operand)) => Some(Self { key, op, operand }),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn evaluate(&self, data: &DataMap) -> bool {
        let Some(value) = data.get(&self.key) else {
            return false;
        };
        match self.op {
            Operator::Exists => !value.is_null(),
            Operator::Equals => render(value) == self.operand,
            Operator::NotEquals => render(value) != self.operand,
            Operator::Contains => match value {
                serde_json::Value::Array(items) => {
                    items.iter().any(|item| render(item) == self.operand)
                }
                other => render(other).contains(&self.operand),
            },
        }
    }
}

/// Strings compare by content; other values by their JSON rendering.
fn render(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Evaluate a conditional expression against accumulated data.
///
/// Returns `false` for unparseable expressions and for missing keys.
pub fn evaluate_condition(expr: &str, data: &DataMap) -> bool {
    Condition::parse(expr).is_some_and(|c| c.evaluate(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(pairs: &[(&str, serde_json::Value)]) -> DataMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_edge_builders() {
        let e = Edge::always("a", "b");
        assert_eq!(e.from, "a");
        assert_eq!(e.to, "b");
        assert!(matches!(e.condition, EdgeCondition::Always));
        assert!(!e.is_self_loop());
        assert!(Edge::always("a", "a").is_self_loop());
    }

    #[test]
    fn test_condition_equals() {
        let ctx = data(&[("status", json!("success")), ("count", json!(3))]);

        assert!(evaluate_condition(r#"status == "success""#, &ctx));
        assert!(!evaluate_condition(r#"status == "failure""#, &ctx));
        assert!(evaluate_condition("count == 3", &ctx));
        assert!(evaluate_condition(r#"status=="success""#, &ctx));
    }

    #[test]
    fn test_condition_not_equals() {
        let ctx = data(&[("status", json!("success"))]);

        assert!(evaluate_condition(r#"status != "failure""#, &ctx));
        assert!(!evaluate_condition(r#"status != "success""#, &ctx));
    }

    #[test]
    fn test_condition_contains() {
        let ctx = data(&[
            ("output", json!("The file was created successfully.")),
            ("tags", json!(["rust", "async"])),
        ]);

        assert!(evaluate_condition(r#"output contains "created""#, &ctx));
        assert!(!evaluate_condition(r#"output contains "deleted""#, &ctx));
        assert!(evaluate_condition(r#"tags contains "async""#, &ctx));
        assert!(!evaluate_condition(r#"tags contains "as""#, &ctx));
    }

    #[test]
    fn test_condition_exists() {
        let ctx = data(&[("present", json!(false)), ("empty", serde_json::Value::Null)]);

        assert!(evaluate_condition("present exists", &ctx));
        assert!(!evaluate_condition("empty exists", &ctx));
        assert!(!evaluate_condition("missing exists", &ctx));
    }

    #[test]
    fn test_condition_missing_key() {
        assert!(!evaluate_condition(r#"missing == "value""#, &DataMap::new()));
        assert!(!evaluate_condition(r#"missing != "value""#, &DataMap::new()));
    }

    #[test]
    fn test_condition_invalid_expr() {
        assert!(Condition::parse("this is not valid").is_none());
        assert!(Condition::parse("key ==").is_none());
        assert!(Condition::parse(r#"key exists "x""#).is_none());
        assert_eq!(Condition::parse("sentiment exists").unwrap().key(), "sentiment");
    }

    #[test]
    fn test_edge_traversable() {
        let ctx = data(&[("route", json!("fast"))]);
        assert!(Edge::always("a", "b").is_traversable(&ctx));
        assert!(Edge::conditional("a", "b", r#"route == "fast""#).is_traversable(&ctx));
        assert!(!Edge::conditional("a", "c", r#"route == "slow""#).is_traversable(&ctx));
    }

    #[test]
    fn test_serialization_roundtrip() {
        let edge = Edge::conditional("a", "b", r#"status == "ok""#);
        let json = serde_json::to_string(&edge).unwrap();
        let parsed: Edge = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, edge);

        let parsed: Edge = serde_json::from_str(r#"{"from": "x", "to": "y"}"#).unwrap();
        assert_eq!(parsed.condition, EdgeCondition::Always);
    }
}
