//! # meshloop core
//!
//! Domain types, traits, and error definitions for the meshloop tool-use
//! orchestrator. A model service and a tool provider are coordinated through
//! the two traits defined here; everything else in the workspace implements
//! against them.
//!
//! ## Design Philosophy
//!
//! Every collaborator is a trait here. Implementations live in their
//! respective crates:
//! - `Provider` (the model service) lives in `meshloop-providers`
//! - `ToolTransport` (the tool provider session) lives in `meshloop-mcp`
//!
//! The orchestration loop in `meshloop-agent` only ever sees these traits,
//! which keeps it testable with scripted mocks.

pub mod agent;
pub mod catalog;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::{LoopState, Termination};
pub use catalog::{ToolSchema, to_model_schema};
pub use error::{
    CatalogError, Error, ErrorKind, ModelInvocationError, ProtocolError, ProviderError,
    TransportError,
};
pub use event::{DomainEvent, EventBus};
pub use message::{ContentBlock, ConversationId, ConversationLog, EncodedImage, Role, Turn};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StopReason, Usage};
pub use tool::{ToolCall, ToolDescriptor, ToolExecutionError, ToolOutcome, ToolResult, ToolTransport};
