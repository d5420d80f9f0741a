use std::collections::HashMap;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Deserialize;

use agenticflow_core::error::{FlowError, Result};
use agenticflow_core::traits::Tool;
use agenticflow_core::types::{ToolContext, ToolResult};

const MAX_BODY_CHARS: usize = 10_000;

// ── HttpRequestTool ─────────────────────────────────────────────

pub struct HttpRequestTool;

#[derive(Deserialize)]
struct HttpRequestInput {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    /// Sent as a JSON body for POST/PUT/PATCH, as query parameters for GET.
    #[serde(default)]
    data: Option<serde_json::Value>,
}
fn default_method() -> String {
    "GET".into()
}

impl Tool for HttpRequestTool {
    fn name(&self) -> &str {
        "http_request"
    }
    fn timeout_secs(&self) -> u64 {
        60
    }
    fn description(&self) -> &str {
        "Make an HTTP request to a URL. Returns status_code, headers and content."
    }
    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": { "type": "string" },
                "method": { "type": "string", "description": "HTTP method (default: GET)" },
                "headers": { "type": "object", "description": "Request headers" },
                "data": { "type": "object", "description": "JSON body, or query parameters for GET" }
            },
            "required": ["url"]
        })
    }
    fn execute(
        &self,
        input: serde_json::Value,
        _ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let p: HttpRequestInput = serde_json::from_value(input)
                .map_err(|e| FlowError::ToolValidation(e.to_string()))?;
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .map_err(|e| FlowError::ToolExecution {
                    tool: "http_request".into(),
                    message: e.to_string(),
                })?;

            let method = p
                .method
                .to_uppercase()
                .parse::<reqwest::Method>()
                .map_err(|e| FlowError::ToolValidation(format!("Invalid method: {}", e)))?;

            let sends_body = method == reqwest::Method::POST
                || method == reqwest::Method::PUT
                || method == reqwest::Method::PATCH;
            let is_get = method == reqwest::Method::GET;

            let mut req = client.request(method, &p.url);
            for (k, v) in &p.headers {
                req = req.header(k.as_str(), v.as_str());
            }
            if let Some(data) = p.data {
                if sends_body {
                    req = req.json(&data);
                } else if is_get {
                    req = req.query(&query_pairs(&data));
                }
            }

            let resp = req.send().await.map_err(|e| FlowError::ToolExecution {
                tool: "http_request".into(),
                message: e.to_string(),
            })?;
            let status = resp.status();
            let headers: serde_json::Map<String, serde_json::Value> = resp
                .headers()
                .iter()
                .map(|(k, v)| {
                    (
                        k.to_string(),
                        serde_json::Value::String(v.to_str().unwrap_or("?").to_string()),
                    )
                })
                .collect();
            let is_json = headers
                .get("content-type")
                .and_then(|v| v.as_str())
                .is_some_and(|ct| ct.starts_with("application/json"));
            let body = resp.text().await.map_err(|e| FlowError::ToolExecution {
                tool: "http_request".into(),
                message: format!("reading response body: {}", e),
            })?;

            Ok(ToolResult::success(serde_json::json!({
                "status_code": status.as_u16(),
                "content": decode_body(&body, is_json),
                "headers": headers,
            })))
        })
    }
}

/// Flatten a JSON object into query pairs; non-string scalars are rendered as JSON.
fn query_pairs(data: &serde_json::Value) -> Vec<(String, String)> {
    data.as_object()
        .map(|obj| {
            obj.iter()
                .map(|(k, v)| {
                    let rendered = match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), rendered)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// JSON bodies are parsed when declared as such; anything else (or an
/// unparseable JSON body) is returned as truncated text.
fn decode_body(body: &str, is_json: bool) -> serde_json::Value {
    if is_json {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
            return value;
        }
    }
    let truncated: String = body.chars().take(MAX_BODY_CHARS).collect();
    serde_json::Value::String(truncated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_pairs() {
        let pairs = query_pairs(&serde_json::json!({"q": "rust", "page": 2}));
        assert!(pairs.contains(&("q".to_string(), "rust".to_string())));
        assert!(pairs.contains(&("page".to_string(), "2".to_string())));
        assert!(query_pairs(&serde_json::json!("scalar")).is_empty());
    }

    #[test]
    fn test_decode_body() {
        assert_eq!(
            decode_body(r#"{"ok": true}"#, true),
            serde_json::json!({"ok": true})
        );
        assert_eq!(decode_body("{broken", true), serde_json::json!("{broken"));
        assert_eq!(decode_body(r#"{"ok": true}"#, false), serde_json::json!(r#"{"ok": true}"#));
    }

    #[tokio::test]
    async fn test_invalid_method_rejected() {
        let ctx = ToolContext::new("net", std::path::PathBuf::from("."));
        let err = HttpRequestTool
            .execute(
                serde_json::json!({"url": "http://localhost", "method": "NOT A METHOD"}),
                ctx,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::ToolValidation(_)));
    }

    #[tokio::test]
    async fn test_truncated_body_is_an_error() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\npartial")
                .await
                .unwrap();
        });

        let ctx = ToolContext::new("net", std::path::PathBuf::from("."));
        let err = HttpRequestTool
            .execute(serde_json::json!({"url": format!("http://{}/", addr)}), ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::ToolExecution { .. }), "{}", err);
    }
}
