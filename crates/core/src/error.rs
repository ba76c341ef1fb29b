//! Error types for the meshloop domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each collaborator has its own error enum; `Error` unifies them for the
//! orchestration loop.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The top-level error type for all meshloop operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Model service errors (after the resilient invoker) ---
    #[error("Model invocation failed: {0}")]
    ModelInvocation(#[from] ModelInvocationError),

    // --- Tool provider channel errors ---
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    // --- Tool catalog errors ---
    #[error("Tool catalog error: {0}")]
    Catalog(#[from] CatalogError),

    // --- Model response shape errors ---
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

// --- Model service ---

/// Coarse classification of a `ProviderError`, consumed by retry predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Overloaded,
    RateLimited,
    Timeout,
    Network,
    Authentication,
    InvalidRequest,
    MalformedResponse,
    Other,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Overloaded => "overloaded",
            Self::RateLimited => "rate_limited",
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::Authentication => "authentication",
            Self::InvalidRequest => "invalid_request",
            Self::MalformedResponse => "malformed_response",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "overloaded" => Ok(Self::Overloaded),
            "rate_limited" => Ok(Self::RateLimited),
            "timeout" => Ok(Self::Timeout),
            "network" => Ok(Self::Network),
            "authentication" => Ok(Self::Authentication),
            "invalid_request" => Ok(Self::InvalidRequest),
            "malformed_response" => Ok(Self::MalformedResponse),
            "other" => Ok(Self::Other),
            other => Err(format!("unknown error kind '{other}'")),
        }
    }
}

/// A single failed call to the model service, as reported by a `Provider`.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Model service overloaded: {0}")]
    Overloaded(String),

    #[error("Rate limited by model service, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Overloaded(_) => ErrorKind::Overloaded,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Network(_) => ErrorKind::Network,
            Self::AuthenticationFailed(_) => ErrorKind::Authentication,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::MalformedResponse(_) => ErrorKind::MalformedResponse,
            Self::ApiError { .. } | Self::NotConfigured(_) => ErrorKind::Other,
        }
    }
}

/// Terminal failure of a model invocation after the retry policy has run.
#[derive(Debug, Clone, Error)]
pub enum ModelInvocationError {
    /// Every attempt failed with a retryable error; carries the last one.
    #[error("gave up after {attempts} attempts: {source}")]
    Transient {
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    /// A non-retryable error; propagated without further attempts.
    #[error("{source} (attempt {attempts})")]
    Fatal {
        attempts: u32,
        #[source]
        source: ProviderError,
    },
}

impl ModelInvocationError {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Transient { attempts, .. } | Self::Fatal { attempts, .. } => *attempts,
        }
    }

    pub fn provider_error(&self) -> &ProviderError {
        match self {
            Self::Transient { source, .. } | Self::Fatal { source, .. } => source,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

// --- Tool provider ---

/// Failure of the channel to the tool provider process. Never retried.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to spawn tool provider '{command}': {reason}")]
    Spawn { command: String, reason: String },

    #[error("I/O error on tool provider channel: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tool provider closed the connection")]
    ConnectionClosed,

    #[error("Tool provider did not answer '{method}' within {timeout_secs}s")]
    Timeout { method: String, timeout_secs: u64 },

    #[error("Handshake with tool provider failed: {0}")]
    Handshake(String),

    #[error("Tool provider returned error {code} for '{method}': {message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },

    #[error("Could not decode tool provider message: {0}")]
    Decode(String),
}

/// A provider tool descriptor that cannot be offered to the model.
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    #[error("Tool descriptor #{index} has an empty name")]
    EmptyName { index: usize },

    #[error("Tool '{name}' has a non-object input schema")]
    InvalidSchema { name: String },
}

// --- Model response shape ---

/// The model answered, but the answer cannot drive the protocol forward.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ProtocolError {
    #[error("model returned an empty response")]
    EmptyResponse,

    #[error("model response carries no stop reason")]
    MissingStopReason,

    #[error("model stopped with unrecognized reason '{0}'")]
    UnknownStopReason(String),

    #[error("model signalled tool use but sent no tool-call blocks")]
    ToolUseWithoutCalls,

    #[error("model stopped with '{stop_reason}' in the middle of tool call '{call_id}'")]
    TruncatedToolCall { stop_reason: String, call_id: String },

    #[error("conversation has tool call '{0}' without a matching result")]
    UnmatchedToolCall(String),

    #[error("conversation has tool result '{0}' without a preceding tool call")]
    OrphanToolResult(String),

    #[error("conversation has more than one result for tool call '{0}'")]
    DuplicateToolResult(String),
}
