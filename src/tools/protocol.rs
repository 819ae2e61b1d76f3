//! JSON-RPC 2.0 and MCP message types for tool provider communication.
//!
//! - **Requests**: bot → provider (`initialize`, `tools/list`, `tools/call`)
//! - **Responses**: provider → bot (result or error, correlated by `id`)
//! - **Notifications**: either direction, no `id` (`notifications/initialized`)

use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC request
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC notification (no response expected)
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params: None,
        }
    }
}

/// JSON-RPC response
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    pub id: Option<u64>,
    pub result: Option<serde_json::Value>,
    pub error: Option<RpcError>,
}

/// JSON-RPC error object
#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

/// Classification of a frame read from a provider's stdout.
#[derive(Debug, PartialEq, Eq)]
pub enum MessageKind {
    /// Reply to one of our requests.
    Response(u64),
    /// Server-initiated request (sampling, roots); we answer with an error.
    IncomingRequest(serde_json::Value),
    /// Error reply the provider could not tie to a request, e.g. a parse error with `"id": null`.
    UnmatchedError,
    /// Logging or progress notification.
    Notification,
}

/// Classify a JSON-RPC frame by inspecting its `id` and `method` fields.
pub fn classify_message(json: &serde_json::Value) -> MessageKind {
    let id = json.get("id");
    let has_method = json.get("method").and_then(|v| v.as_str()).is_some();

    match (id, has_method) {
        (Some(id), true) => MessageKind::IncomingRequest(id.clone()),
        (_, true) => MessageKind::Notification,
        (id, false) => match id.and_then(serde_json::Value::as_u64) {
            Some(id) => MessageKind::Response(id),
            None if json.get("error").is_some() => MessageKind::UnmatchedError,
            None => MessageKind::Notification,
        },
    }
}

/// Parameters for the `initialize` handshake.
pub fn initialize_params() -> serde_json::Value {
    serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        }
    })
}

/// A tool advertised by a provider in `tools/list`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "empty_object_schema")]
    pub input_schema: serde_json::Value,
}

fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// Result page of `tools/list`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    pub tools: Vec<ToolDescriptor>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Result of `tools/call`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<serde_json::Value>,
    #[serde(default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// Joins text blocks; non-text blocks are rendered as JSON.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(|block| match block.get("text").and_then(|t| t.as_str()) {
                Some(text) if block.get("type").and_then(|t| t.as_str()) == Some("text") => {
                    text.to_string()
                }
                _ => block.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
