//! Model service implementations for meshloop.
//!
//! `AnthropicProvider` speaks the Messages API. `ResilientInvoker` wraps any
//! `meshloop_core::Provider` with classified retry and exponential backoff;
//! the orchestration loop only ever calls the model through it.

pub mod anthropic;
pub mod retry;

pub use anthropic::AnthropicProvider;
pub use retry::{ResilientInvoker, RetryPolicy};
