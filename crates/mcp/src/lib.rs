//! Transport session to an MCP tool provider.
//!
//! The provider runs as a child process speaking newline-delimited
//! JSON-RPC 2.0 on its stdin/stdout. [`McpSession`] implements
//! `meshloop_core::ToolTransport`: handshake, tool listing with cursor
//! paging, and one call in flight at a time.

pub mod protocol;
pub mod session;

pub use session::McpSession;
