//! Tool types and the transport session trait.
//!
//! The tool provider is an external process exposing named, schema-described
//! operations. meshloop never interprets them: it forwards opaque names and
//! argument maps and records whatever comes back.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// A capability advertised by the tool provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// JSON Schema for the arguments, passed through untouched
    pub input_schema: serde_json::Value,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Model-assigned id; the matching result must carry it back
    pub id: String,

    pub name: String,

    /// Arguments as a JSON object
    pub arguments: serde_json::Value,
}

/// The provider ran the call and reported failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("tool '{tool_name}' failed: {message}")]
pub struct ToolExecutionError {
    pub tool_name: String,
    pub message: String,
}

/// Success or failure of one tool call, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOutcome {
    Success(serde_json::Value),
    Failure(ToolExecutionError),
}

impl ToolOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Render the outcome as the text the model will read.
    pub fn to_content_string(&self) -> String {
        match self {
            Self::Success(serde_json::Value::String(s)) => s.clone(),
            Self::Success(value) => value.to_string(),
            Self::Failure(err) => err.message.clone(),
        }
    }
}

/// The outcome of a `ToolCall`, keyed by its call id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub outcome: ToolOutcome,
}

impl ToolResult {
    pub fn new(call_id: impl Into<String>, outcome: ToolOutcome) -> Self {
        Self {
            call_id: call_id.into(),
            outcome,
        }
    }
}

/// A session with a tool-providing process.
///
/// Methods take `&mut self`: a session has at most one request in flight, so
/// calls are strictly sequential and never pipelined.
#[async_trait]
pub trait ToolTransport: Send {
    /// Perform the protocol handshake. Fails if the provider is unreachable.
    async fn initialize(&mut self) -> Result<(), TransportError>;

    /// The provider's current tool set.
    async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>, TransportError>;

    /// Send one call and wait for its response.
    ///
    /// A provider-reported failure is `Ok(ToolOutcome::Failure(..))`; only a
    /// broken channel is an `Err`.
    async fn call_tool(
        &mut self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolOutcome, TransportError>;

    /// Release the session. Must be safe to call more than once.
    async fn close(&mut self) -> Result<(), TransportError>;
}
