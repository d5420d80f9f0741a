use std::sync::Arc;

use agenticflow_core::types::DataMap;

/// Predicate that ends a traversal successfully.
///
/// Checked after every executed context against the accumulated data and
/// the set of contexts executed so far.
#[derive(Clone)]
pub enum Goal {
    /// The named context has executed.
    Reached(String),
    /// The accumulated data holds a non-null value under this key.
    HasOutput(String),
    /// The accumulated data holds exactly this value under this key.
    OutputEquals { key: String, value: serde_json::Value },
    /// Caller-supplied predicate over the accumulated data.
    Custom(Arc<dyn Fn(&DataMap) -> bool + Send + Sync>),
}

impl Goal {
    pub fn reached(id: impl Into<String>) -> Self {
        Self::Reached(id.into())
    }

    pub fn has_output(key: impl Into<String>) -> Self {
        Self::HasOutput(key.into())
    }

    pub fn output_equals(key: impl Into<String>, value: serde_json::Value) -> Self {
        Self::OutputEquals {
            key: key.into(),
            value,
        }
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&DataMap) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Evaluate against `data`; `executed` answers whether a context id has run.
    pub fn is_met(&self, data: &DataMap, executed: impl Fn(&str) -> bool) -> bool {
        match self {
            Self::Reached(id) => executed(id),
            Self::HasOutput(key) => data.get(key).is_some_and(|v| !v.is_null()),
            Self::OutputEquals { key, value } => data.get(key) == Some(value),
            Self::Custom(f) => f(data),
        }
    }

    /// Whether the goal can be decided without concrete output values.
    ///
    /// Planning only knows which keys a path would produce, not their
    /// values, so value-based goals are approximated by key presence.
    pub(crate) fn is_met_projected(&self, data: &DataMap, executed: impl Fn(&str) -> bool) -> bool {
        match self {
            Self::Reached(id) => executed(id),
            Self::HasOutput(key) | Self::OutputEquals { key, .. } => data.contains_key(key),
            Self::Custom(f) => f(data),
        }
    }
}

impl std::fmt::Debug for Goal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reached(id) => f.debug_tuple("Reached").field(id).finish(),
            Self::HasOutput(key) => f.debug_tuple("HasOutput").field(key).finish(),
            Self::OutputEquals { key, value } => f
                .debug_struct("OutputEquals")
                .field("key", key)
                .field("value", value)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data() -> DataMap {
        let mut d = DataMap::new();
        d.insert("answer".into(), json!(42));
        d.insert("pending".into(), serde_json::Value::Null);
        d
    }

    #[test]
    fn test_reached() {
        let goal = Goal::reached("c");
        assert!(goal.is_met(&data(), |id| id == "c"));
        assert!(!goal.is_met(&data(), |id| id == "b"));
    }

    #[test]
    fn test_output_goals() {
        assert!(Goal::has_output("answer").is_met(&data(), |_| false));
        assert!(!Goal::has_output("pending").is_met(&data(), |_| false));
        assert!(Goal::output_equals("answer", json!(42)).is_met(&data(), |_| false));
        assert!(!Goal::output_equals("answer", json!(41)).is_met(&data(), |_| false));
    }

    #[test]
    fn test_projected_goals_use_key_presence() {
        assert!(Goal::has_output("pending").is_met_projected(&data(), |_| false));
        assert!(Goal::output_equals("pending", json!("x")).is_met_projected(&data(), |_| false));
        assert!(!Goal::has_output("missing").is_met_projected(&data(), |_| false));
    }

    #[test]
    fn test_custom_goal() {
        let goal = Goal::custom(|d| d.get("answer").and_then(|v| v.as_i64()) == Some(42));
        assert!(goal.is_met(&data(), |_| false));
        assert_eq!(format!("{:?}", goal), "Custom(..)");
    }
}
