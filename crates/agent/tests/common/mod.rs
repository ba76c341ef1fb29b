//! Scripted model and recording transport shared by the loop tests.

#![allow(dead_code)]

use async_trait::async_trait;
use meshloop_agent::AgentLoop;
use meshloop_core::error::{ProviderError, TransportError};
use meshloop_core::message::ContentBlock;
use meshloop_core::provider::{Provider, ProviderRequest, ProviderResponse, StopReason, Usage};
use meshloop_core::tool::{ToolCall, ToolDescriptor, ToolExecutionError, ToolOutcome, ToolTransport};
use meshloop_providers::{ResilientInvoker, RetryPolicy};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A model that replays scripted results and records every request.
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedModel {
    pub fn new(script: Vec<Result<ProviderResponse, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn replies(responses: Vec<ProviderResponse>) -> Arc<Self> {
        Self::new(responses.into_iter().map(Ok).collect())
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Provider for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::InvalidRequest("script exhausted".into())))
    }
}

pub fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        id: "msg_text".into(),
        model: "mock-model".into(),
        stop_reason: Some(StopReason::EndTurn),
        content: vec![ContentBlock::text(text)],
        usage: Some(Usage {
            input_tokens: 10,
            output_tokens: 5,
        }),
    }
}

pub fn tool_use_response(text: &str, calls: &[(&str, &str, Value)]) -> ProviderResponse {
    let mut content = Vec::new();
    if !text.is_empty() {
        content.push(ContentBlock::text(text));
    }
    for (id, name, args) in calls {
        content.push(ContentBlock::ToolCall(ToolCall {
            id: (*id).to_string(),
            name: (*name).to_string(),
            arguments: args.clone(),
        }));
    }
    ProviderResponse {
        id: "msg_tool".into(),
        model: "mock-model".into(),
        stop_reason: Some(StopReason::ToolUse),
        content,
        usage: Some(Usage {
            input_tokens: 20,
            output_tokens: 10,
        }),
    }
}

pub fn overloaded() -> ProviderError {
    ProviderError::Overloaded("overloaded_error".into())
}

/// What the transport saw and how it should misbehave.
#[derive(Default)]
pub struct TransportRecord {
    pub initialized: u32,
    pub listed: u32,
    pub calls: Vec<(String, Value)>,
    pub closed: u32,
    /// Zero-based call index that raises `ConnectionClosed`
    pub break_on_call: Option<usize>,
    /// Never answer tool calls
    pub hang_on_call: bool,
    pub tools: Vec<ToolDescriptor>,
}

/// A tool provider that records traffic. Tools named `broken_*` report failure.
#[derive(Clone)]
pub struct RecordingTransport {
    pub record: Arc<Mutex<TransportRecord>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        let record = TransportRecord {
            tools: vec![
                ToolDescriptor {
                    name: "get_scene_info".into(),
                    description: "Inspect the scene".into(),
                    input_schema: json!({"type": "object", "properties": {}}),
                },
                ToolDescriptor {
                    name: "create_object".into(),
                    description: "Add a primitive".into(),
                    input_schema: json!({
                        "type": "object",
                        "properties": {"type": {"type": "string"}},
                        "required": ["type"]
                    }),
                },
            ],
            ..TransportRecord::default()
        };
        Self {
            record: Arc::new(Mutex::new(record)),
        }
    }

    pub fn breaking_on_call(index: usize) -> Self {
        let t = Self::new();
        t.record.lock().unwrap().break_on_call = Some(index);
        t
    }

    pub fn hanging() -> Self {
        let t = Self::new();
        t.record.lock().unwrap().hang_on_call = true;
        t
    }

    pub fn with_tools(tools: Vec<ToolDescriptor>) -> Self {
        let t = Self::new();
        t.record.lock().unwrap().tools = tools;
        t
    }

    pub fn call_names(&self) -> Vec<String> {
        self.record
            .lock()
            .unwrap()
            .calls
            .iter()
            .map(|(n, _)| n.clone())
            .collect()
    }

    pub fn closed(&self) -> u32 {
        self.record.lock().unwrap().closed
    }
}

#[async_trait]
impl ToolTransport for RecordingTransport {
    async fn initialize(&mut self) -> Result<(), TransportError> {
        self.record.lock().unwrap().initialized += 1;
        Ok(())
    }

    async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>, TransportError> {
        let mut record = self.record.lock().unwrap();
        record.listed += 1;
        Ok(record.tools.clone())
    }

    async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<ToolOutcome, TransportError> {
        let hang = {
            let mut record = self.record.lock().unwrap();
            let index = record.calls.len();
            record.calls.push((name.to_string(), arguments.clone()));
            if record.break_on_call == Some(index) {
                return Err(TransportError::ConnectionClosed);
            }
            record.hang_on_call
        };
        if hang {
            std::future::pending::<()>().await;
        }

        if name.starts_with("broken_") {
            Ok(ToolOutcome::Failure(ToolExecutionError {
                tool_name: name.to_string(),
                message: format!("{name} is not available"),
            }))
        } else {
            Ok(ToolOutcome::Success(json!(format!("{name} ok: {arguments}"))))
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.record.lock().unwrap().closed += 1;
        Ok(())
    }
}

pub fn invoker(model: Arc<ScriptedModel>, max_attempts: u32) -> Arc<ResilientInvoker> {
    Arc::new(ResilientInvoker::new(
        model,
        RetryPolicy::new(max_attempts, Duration::from_millis(100), 2.0),
    ))
}

pub fn agent(model: Arc<ScriptedModel>, max_iterations: u32) -> AgentLoop {
    AgentLoop::new(invoker(model, 3), "mock-model", 1024).with_max_iterations(max_iterations)
}
