//! JSON-RPC 2.0 framing and the MCP payloads meshloop uses.

use meshloop_core::error::TransportError;
use meshloop_core::tool::ToolDescriptor;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC error code for an unsupported method.
pub const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A line read from the provider, sorted by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Response {
        id: Value,
        outcome: Result<Value, JsonRpcError>,
    },
    /// Server-initiated request; must be answered
    Request { id: Value, method: String },
    Notification { method: String },
}

impl Incoming {
    pub fn parse(line: &str) -> Result<Self, TransportError> {
        let value: Value = serde_json::from_str(line)
            .map_err(|e| TransportError::Decode(format!("{e}: {}", line.trim())))?;
        let Value::Object(mut map) = value else {
            return Err(TransportError::Decode(format!(
                "expected a JSON object, got: {}",
                line.trim()
            )));
        };

        let method = map
            .get("method")
            .and_then(Value::as_str)
            .map(str::to_string);
        let id = map.remove("id").filter(|id| !id.is_null());

        match (method, id) {
            (Some(method), Some(id)) => Ok(Self::Request { id, method }),
            (Some(method), None) => Ok(Self::Notification { method }),
            (None, Some(id)) => {
                if let Some(error) = map.remove("error") {
                    let error: JsonRpcError = serde_json::from_value(error)
                        .map_err(|e| TransportError::Decode(format!("bad error object: {e}")))?;
                    Ok(Self::Response {
                        id,
                        outcome: Err(error),
                    })
                } else {
                    Ok(Self::Response {
                        id,
                        outcome: Ok(map.remove("result").unwrap_or(Value::Null)),
                    })
                }
            }
            (None, None) => Err(TransportError::Decode(format!(
                "message has neither id nor method: {}",
                line.trim()
            ))),
        }
    }
}

/// Error reply for a server request we do not serve.
pub fn method_not_found(id: Value, method: &str) -> Value {
    serde_json::json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "error": {
            "code": METHOD_NOT_FOUND,
            "message": format!("Method not found: {method}"),
        }
    })
}

pub fn initialize_params() -> Value {
    serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": "meshloop",
            "version": env!("CARGO_PKG_VERSION"),
        }
    })
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub server_info: Option<ServerInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

impl From<McpTool> for ToolDescriptor {
    fn from(tool: McpTool) -> Self {
        ToolDescriptor {
            name: tool.name,
            description: tool.description.unwrap_or_default(),
            input_schema: tool.input_schema,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<McpTool>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<Value>,
    #[serde(default)]
    pub is_error: Option<bool>,
}

impl CallToolResult {
    /// Text of every `{"type": "text"}` item, in order.
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.content.iter().filter_map(|item| {
            if item.get("type").and_then(Value::as_str) == Some("text") {
                item.get("text").and_then(Value::as_str)
            } else {
                None
            }
        })
    }

    /// Collapse the content array into one value.
    ///
    /// All-text content becomes a single newline-joined string; otherwise an
    /// array with text items flattened to strings and other items verbatim.
    pub fn into_value(self) -> Value {
        let all_text = self
            .content
            .iter()
            .all(|item| item.get("type").and_then(Value::as_str) == Some("text"));
        if all_text {
            return Value::String(self.texts().collect::<Vec<_>>().join("\n"));
        }
        Value::Array(
            self.content
                .into_iter()
                .map(|item| match item.get("type").and_then(Value::as_str) {
                    Some("text") => item.get("text").cloned().unwrap_or(Value::Null),
                    _ => item,
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serializes_without_null_params() {
        let req = JsonRpcRequest::new(7, "tools/list", None);
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v, json!({"jsonrpc": "2.0", "id": 7, "method": "tools/list"}));
    }

    #[test]
    fn parse_success_response() {
        let msg = Incoming::parse(r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#).unwrap();
        assert_eq!(
            msg,
            Incoming::Response {
                id: json!(1),
                outcome: Ok(json!({"ok": true}))
            }
        );
    }

    #[test]
    fn parse_error_response() {
        let msg = Incoming::parse(
            r#"{"jsonrpc":"2.0","id":2,"error":{"code":-32602,"message":"bad params"}}"#,
        )
        .unwrap();
        match msg {
            Incoming::Response { id, outcome: Err(e) } => {
                assert_eq!(id, json!(2));
                assert_eq!(e.code, -32602);
                assert_eq!(e.message, "bad params");
            }
            other => panic!("Expected error response, got: {other:?}"),
        }
    }

    #[test]
    fn parse_notification_and_request() {
        assert_eq!(
            Incoming::parse(r#"{"jsonrpc":"2.0","method":"notifications/message","params":{}}"#)
                .unwrap(),
            Incoming::Notification {
                method: "notifications/message".into()
            }
        );
        assert_eq!(
            Incoming::parse(r#"{"jsonrpc":"2.0","id":"s1","method":"roots/list"}"#).unwrap(),
            Incoming::Request {
                id: json!("s1"),
                method: "roots/list".into()
            }
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(
            Incoming::parse("Starting BlenderMCP server..."),
            Err(TransportError::Decode(_))
        ));
        assert!(matches!(Incoming::parse("[1,2]"), Err(TransportError::Decode(_))));
    }

    #[test]
    fn tool_maps_to_descriptor() {
        let tool: McpTool = serde_json::from_value(json!({
            "name": "get_scene_info",
            "inputSchema": {"type": "object", "properties": {}}
        }))
        .unwrap();
        let desc = ToolDescriptor::from(tool);
        assert_eq!(desc.name, "get_scene_info");
        assert_eq!(desc.description, "");
        assert_eq!(desc.input_schema["type"], "object");
    }

    #[test]
    fn text_content_is_joined() {
        let result: CallToolResult = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "Created Cube"},
                {"type": "text", "text": "at (0, 0, 0)"}
            ]
        }))
        .unwrap();
        assert_eq!(result.into_value(), json!("Created Cube\nat (0, 0, 0)"));
    }

    #[test]
    fn mixed_content_keeps_non_text_items() {
        let image = json!({"type": "image", "data": "AAAA", "mimeType": "image/png"});
        let result: CallToolResult = serde_json::from_value(json!({
            "content": [{"type": "text", "text": "viewport"}, image.clone()]
        }))
        .unwrap();
        assert_eq!(result.into_value(), json!(["viewport", image]));
    }

    #[test]
    fn method_not_found_reply_echoes_id() {
        let reply = method_not_found(json!(9), "sampling/createMessage");
        assert_eq!(reply["id"], 9);
        assert_eq!(reply["error"]["code"], METHOD_NOT_FOUND);
    }
}
