//! Turn and ConversationLog domain types.
//!
//! These are the value objects that flow between the orchestration loop and
//! the model service: the loop appends turns, the provider serializes the
//! whole log on every re-invocation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::ProtocolError;
use crate::tool::{ToolCall, ToolResult};

/// Unique identifier for a conversation log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who a turn is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The end user (prompt and image)
    User,
    /// The model
    Assistant,
    /// Outcomes of tool calls, fed back to the model
    ToolResult,
}

/// An image already encoded for transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedImage {
    /// MIME type, e.g. `image/png`
    pub media_type: String,
    /// Base64 payload
    pub data: String,
}

/// One unit of content inside a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Image(EncodedImage),
    ToolCall(ToolCall),
    ToolResult(ToolResult),
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn as_tool_call(&self) -> Option<&ToolCall> {
        match self {
            Self::ToolCall(call) => Some(call),
            _ => None,
        }
    }
}

/// A single message in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,

    /// Ordered content; order is preserved on the wire
    pub blocks: Vec<ContentBlock>,

    pub timestamp: DateTime<Utc>,
}

impl Turn {
    fn new(role: Role, blocks: Vec<ContentBlock>) -> Self {
        Self {
            role,
            blocks,
            timestamp: Utc::now(),
        }
    }

    /// The opening turn: the image (if any) followed by the instruction.
    pub fn user_task(prompt: impl Into<String>, image: Option<EncodedImage>) -> Self {
        let mut blocks = Vec::with_capacity(2);
        if let Some(image) = image {
            blocks.push(ContentBlock::Image(image));
        }
        blocks.push(ContentBlock::text(prompt));
        Self::new(Role::User, blocks)
    }

    pub fn assistant(blocks: Vec<ContentBlock>) -> Self {
        Self::new(Role::Assistant, blocks)
    }

    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Self::new(
            Role::ToolResult,
            results.into_iter().map(ContentBlock::ToolResult).collect(),
        )
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().filter_map(ContentBlock::as_text)
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.blocks.iter().filter_map(ContentBlock::as_tool_call)
    }
}

/// Ordered, append-only sequence of turns.
///
/// Insertion order is the wire order sent to the model. Turns can only be
/// appended; there is no way to edit or drop one once it is in the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationLog {
    pub id: ConversationId,
    pub created_at: DateTime<Utc>,
    turns: Vec<Turn>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self {
            id: ConversationId::new(),
            created_at: Utc::now(),
            turns: Vec::new(),
        }
    }

    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Verify the tool pairing invariant.
    ///
    /// Every tool call must be answered by exactly one later tool result with
    /// the same id, and no result may appear before (or without) its call.
    pub fn check_consistency(&self) -> Result<(), ProtocolError> {
        // call id -> results seen so far
        let mut calls: HashMap<&str, usize> = HashMap::new();
        let mut order: Vec<&str> = Vec::new();

        for turn in &self.turns {
            for block in &turn.blocks {
                match block {
                    ContentBlock::ToolCall(call) => {
                        calls.insert(call.id.as_str(), 0);
                        order.push(call.id.as_str());
                    }
                    ContentBlock::ToolResult(result) => {
                        let Some(seen) = calls.get_mut(result.call_id.as_str()) else {
                            return Err(ProtocolError::OrphanToolResult(result.call_id.clone()));
                        };
                        *seen += 1;
                        if *seen > 1 {
                            return Err(ProtocolError::DuplicateToolResult(
                                result.call_id.clone(),
                            ));
                        }
                    }
                    _ => {}
                }
            }
        }

        match order.into_iter().find(|id| calls.get(id) == Some(&0)) {
            Some(id) => Err(ProtocolError::UnmatchedToolCall(id.to_string())),
            None => Ok(()),
        }
    }
}

impl Default for ConversationLog {
    fn default() -> Self {
        Self::new()
    }
}
