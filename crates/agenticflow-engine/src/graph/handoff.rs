use serde::{Deserialize, Serialize};

use agenticflow_core::types::DataMap;

/// Data accumulated across one traversal.
///
/// Starts from the request's initial data; every successful context
/// merges its outputs in, later writes overwriting earlier ones.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandoffContext {
    data: DataMap,
}

impl HandoffContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a HandoffContext from initial data.
    pub fn from_map(data: DataMap) -> Self {
        Self { data }
    }

    /// Get a value by key.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    /// Get a value as a string, if it's a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Set a value.
    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.data.insert(key.into(), value);
    }

    /// Merge a context's outputs (overwrites on conflict).
    pub fn merge_outputs(&mut self, outputs: &DataMap) {
        for (k, v) in outputs {
            self.data.insert(k.clone(), v.clone());
        }
    }

    /// Bind `keys` to null where they are not already present.
    pub fn project_keys(&mut self, keys: &[String]) {
        for key in keys {
            self.data
                .entry(key.clone())
                .or_insert(serde_json::Value::Null);
        }
    }

    /// Turn free-form output text into values for `output_keys`.
    ///
    /// A JSON object yields the matching keys; anything else is stored
    /// verbatim under every output key.
    pub fn parse_output(output_keys: &[String], output_text: &str) -> DataMap {
        let mut outputs = DataMap::new();
        if output_keys.is_empty() {
            return outputs;
        }

        if let Ok(json) = serde_json::from_str::<serde_json::Value>(output_text) {
            if let Some(obj) = json.as_object() {
                for key in output_keys {
                    if let Some(val) = obj.get(key) {
                        outputs.insert(key.clone(), val.clone());
                    }
                }
                return outputs;
            }
        }

        for key in output_keys {
            outputs.insert(
                key.clone(),
                serde_json::Value::String(output_text.to_string()),
            );
        }
        outputs
    }

    /// Get the underlying data map.
    pub fn data(&self) -> &DataMap {
        &self.data
    }

    pub fn into_inner(self) -> DataMap {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_basic_operations() {
        let mut ctx = HandoffContext::new();
        ctx.set("name", json!("Alice"));
        ctx.set("count", json!(42));

        assert_eq!(ctx.get_str("name"), Some("Alice"));
        assert_eq!(ctx.get("count"), Some(&json!(42)));
        assert_eq!(ctx.get("missing"), None);
        assert!(ctx.contains("count"));
    }

    #[test]
    fn test_merge_outputs_overwrites() {
        let mut ctx = HandoffContext::new();
        ctx.set("a", json!("1"));
        ctx.set("b", json!("2"));

        let mut outputs = DataMap::new();
        outputs.insert("b".into(), json!("overwritten"));
        outputs.insert("c".into(), json!("3"));
        ctx.merge_outputs(&outputs);

        assert_eq!(ctx.get_str("a"), Some("1"));
        assert_eq!(ctx.get_str("b"), Some("overwritten"));
        assert_eq!(ctx.get_str("c"), Some("3"));
    }

    #[test]
    fn test_project_keys_keeps_existing_values() {
        let mut ctx = HandoffContext::new();
        ctx.set("kept", json!(1));
        ctx.project_keys(&["kept".into(), "planned".into()]);

        assert_eq!(ctx.get("kept"), Some(&json!(1)));
        assert_eq!(ctx.get("planned"), Some(&serde_json::Value::Null));
    }

    #[test]
    fn test_parse_json_output() {
        let output = r#"{"findings": "Rust is fast", "score": 9.5, "extra": true}"#;
        let parsed = HandoffContext::parse_output(&["findings".into(), "score".into()], output);

        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed["findings"], json!("Rust is fast"));
        assert_eq!(parsed["score"], json!(9.5));
    }

    #[test]
    fn test_parse_plain_text_output() {
        let parsed = HandoffContext::parse_output(&["summary".into()], "A plain text result.");
        assert_eq!(parsed["summary"], json!("A plain text result."));
    }

    #[test]
    fn test_parse_output_without_keys() {
        assert!(HandoffContext::parse_output(&[], "anything").is_empty());
    }
}
