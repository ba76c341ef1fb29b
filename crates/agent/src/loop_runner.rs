//! The orchestration loop implementation.

use chrono::Utc;
use meshloop_config::AppConfig;
use meshloop_core::agent::{LoopState, Termination};
use meshloop_core::catalog::{ToolSchema, to_model_schema};
use meshloop_core::error::{Error, ProtocolError};
use meshloop_core::event::{DomainEvent, EventBus};
use meshloop_core::message::{ConversationLog, EncodedImage, Turn};
use meshloop_core::provider::{ProviderRequest, ProviderResponse, StopReason};
use meshloop_core::tool::{ToolCall, ToolResult, ToolTransport};
use meshloop_providers::ResilientInvoker;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What the user asked for: a prompt and an optional reference image.
#[derive(Debug, Clone)]
pub struct Task {
    pub prompt: String,
    pub image: Option<EncodedImage>,
}

impl Task {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            image: None,
        }
    }

    pub fn with_image(mut self, image: EncodedImage) -> Self {
        self.image = Some(image);
        self
    }
}

/// A run that reached a terminal state on its own terms.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub final_text: Vec<String>,
    pub termination: Termination,
    pub state: LoopState,
    pub log: ConversationLog,
}

impl LoopOutcome {
    /// The collected text as one answer.
    pub fn answer(&self) -> String {
        self.final_text.join("\n")
    }
}

/// A run aborted by a fatal error. Carries the log as it stood.
#[derive(Debug, thiserror::Error)]
#[error("aborted at iteration {iteration}: {error}")]
pub struct LoopFailure {
    #[source]
    pub error: Error,
    pub iteration: u32,
    pub log: ConversationLog,
}

/// Where the state machine currently is.
#[derive(Debug)]
enum Phase {
    Init,
    AwaitingModel,
    DispatchingTool(Vec<ToolCall>),
    Terminal(Termination),
}

/// Drives the model and a tool provider until the task is done.
pub struct AgentLoop {
    /// Every model call goes through the retrying invoker
    invoker: Arc<ResilientInvoker>,

    /// The model to request
    model: String,

    /// Max tokens per model response
    max_tokens: u32,

    /// Optional system instructions
    system: Option<String>,

    /// Maximum tool dispatch rounds per run
    max_iterations: u32,

    /// Progress events
    event_bus: Option<Arc<EventBus>>,
}

impl AgentLoop {
    pub fn new(invoker: Arc<ResilientInvoker>, model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            invoker,
            model: model.into(),
            max_tokens,
            system: None,
            max_iterations: 10,
            event_bus: None,
        }
    }

    /// Build with model, token, prompt and cap settings taken from `config`.
    pub fn from_config(invoker: Arc<ResilientInvoker>, config: &AppConfig) -> Self {
        let mut agent = Self::new(invoker, &config.model, config.max_tokens)
            .with_max_iterations(config.agent.max_iterations);
        agent.system = config.system_prompt.clone();
        agent
    }

    pub fn with_system_prompt(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set the maximum number of tool dispatch rounds.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Run one task against `transport`.
    ///
    /// The transport is owned for the duration of the run and closed before
    /// this returns, whatever the outcome.
    pub async fn run<T: ToolTransport>(
        &self,
        mut transport: T,
        task: Task,
        cancel: CancellationToken,
    ) -> Result<LoopOutcome, LoopFailure> {
        let mut log = ConversationLog::new();
        let mut state = LoopState::new(self.max_iterations);

        info!(
            conversation_id = %log.id,
            model = %self.model,
            max_iterations = self.max_iterations,
            has_image = task.image.is_some(),
            "Starting orchestration loop"
        );

        let result = self
            .drive(&mut transport, task, &cancel, &mut log, &mut state)
            .await;

        if let Err(e) = transport.close().await {
            warn!(error = %e, "Failed to close tool provider session");
        }
        state.terminated = true;

        match result {
            Ok(termination) => {
                info!(
                    conversation_id = %log.id,
                    iterations = state.iteration,
                    reason = %termination,
                    "Orchestration loop finished"
                );
                self.publish(DomainEvent::LoopTerminated {
                    conversation_id: log.id.to_string(),
                    reason: termination.to_string(),
                    iterations: state.iteration,
                    timestamp: Utc::now(),
                });
                Ok(LoopOutcome {
                    final_text: state.final_text.clone(),
                    termination,
                    state,
                    log,
                })
            }
            Err(error) => {
                warn!(
                    conversation_id = %log.id,
                    iteration = state.iteration,
                    error = %error,
                    "Orchestration loop aborted"
                );
                self.publish(DomainEvent::LoopTerminated {
                    conversation_id: log.id.to_string(),
                    reason: format!("error: {error}"),
                    iterations: state.iteration,
                    timestamp: Utc::now(),
                });
                Err(LoopFailure {
                    error,
                    iteration: state.iteration,
                    log,
                })
            }
        }
    }

    async fn drive<T: ToolTransport>(
        &self,
        transport: &mut T,
        task: Task,
        cancel: &CancellationToken,
        log: &mut ConversationLog,
        state: &mut LoopState,
    ) -> Result<Termination, Error> {
        let mut tools: Vec<ToolSchema> = Vec::new();
        let mut task = Some(task);
        let mut phase = Phase::Init;

        loop {
            phase = match phase {
                Phase::Init => {
                    if let Some(task) = task.take() {
                        log.append(Turn::user_task(task.prompt, task.image));
                    }

                    let Some(catalog) = until_cancelled(cancel, async {
                        match transport.initialize().await {
                            Ok(()) => transport.list_tools().await,
                            Err(e) => Err(e),
                        }
                    })
                    .await
                    else {
                        return Ok(Termination::Cancelled);
                    };
                    tools = to_model_schema(&catalog?)?;
                    debug!(tools = tools.len(), "Tool catalog ready");
                    Phase::AwaitingModel
                }

                Phase::AwaitingModel => {
                    // Never send a dangling tool call
                    if let Err(e) = log.check_consistency() {
                        warn!(error = %e, "Conversation log is inconsistent");
                        Phase::Terminal(Termination::ProtocolError(e))
                    } else {
                        let request = ProviderRequest {
                            model: self.model.clone(),
                            max_tokens: self.max_tokens,
                            system: self.system.clone(),
                            tools: tools.clone(),
                            messages: log.turns().to_vec(),
                        };

                        debug!(iteration = state.iteration, turns = log.len(), "Invoking model");
                        match until_cancelled(cancel, self.invoker.invoke(&request)).await {
                            None => Phase::Terminal(Termination::Cancelled),
                            Some(response) => {
                                let response = response?;
                                self.publish(DomainEvent::ModelInvoked {
                                    conversation_id: log.id.to_string(),
                                    iteration: state.iteration,
                                    model: response.model.clone(),
                                    stop_reason: response.stop_reason.as_ref().map(|s| s.to_string()),
                                    tokens_used: response.usage.map(|u| u.total()).unwrap_or(0),
                                    timestamp: Utc::now(),
                                });
                                interpret(response, log, state)
                            }
                        }
                    }
                }

                Phase::DispatchingTool(calls) => {
                    match self.dispatch(transport, &calls, cancel).await? {
                        None => Phase::Terminal(Termination::Cancelled),
                        Some(results) => {
                            log.append(Turn::tool_results(results));
                            state.advance();

                            if state.cap_reached() {
                                warn!(
                                    conversation_id = %log.id,
                                    iterations = state.iteration,
                                    "Max tool iterations reached, stopping without completion"
                                );
                                Phase::Terminal(Termination::CapExhausted)
                            } else {
                                Phase::AwaitingModel
                            }
                        }
                    }
                }

                Phase::Terminal(termination) => return Ok(termination),
            };
        }
    }

    /// Execute every call in block order, one at a time.
    ///
    /// Returns `None` if cancelled mid-way.
    async fn dispatch<T: ToolTransport>(
        &self,
        transport: &mut T,
        calls: &[ToolCall],
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<ToolResult>>, Error> {
        let mut results = Vec::with_capacity(calls.len());

        for call in calls {
            debug!(tool = %call.name, call_id = %call.id, "Dispatching tool call");

            let start = std::time::Instant::now();
            let Some(outcome) =
                until_cancelled(cancel, transport.call_tool(&call.name, call.arguments.clone()))
                    .await
            else {
                return Ok(None);
            };
            let outcome = outcome?;
            let duration_ms = start.elapsed().as_millis() as u64;

            if !outcome.is_success() {
                warn!(
                    tool = %call.name,
                    call_id = %call.id,
                    message = %outcome.to_content_string(),
                    "Tool reported failure"
                );
            }

            self.publish(DomainEvent::ToolExecuted {
                call_id: call.id.clone(),
                tool_name: call.name.clone(),
                success: outcome.is_success(),
                duration_ms,
                timestamp: Utc::now(),
            });

            results.push(ToolResult::new(&call.id, outcome));
        }

        Ok(Some(results))
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(ref bus) = self.event_bus {
            bus.publish(event);
        }
    }
}

/// Decide the next phase from a model response.
///
/// Text blocks are collected in every case. Well-formed responses are
/// appended to the log; malformed ones terminate without touching it.
fn interpret(response: ProviderResponse, log: &mut ConversationLog, state: &mut LoopState) -> Phase {
    state
        .final_text
        .extend(response.texts().map(str::to_string));

    if response.content.is_empty() {
        return Phase::Terminal(Termination::ProtocolError(ProtocolError::EmptyResponse));
    }

    let Some(stop_reason) = response.stop_reason.clone() else {
        return Phase::Terminal(Termination::ProtocolError(
            ProtocolError::MissingStopReason,
        ));
    };

    // A call the loop will not dispatch would stay unanswered in the log
    let stray_call = match stop_reason {
        StopReason::ToolUse => None,
        _ => response.tool_calls().next(),
    };
    if let Some(call) = stray_call {
        return Phase::Terminal(Termination::ProtocolError(ProtocolError::TruncatedToolCall {
            stop_reason: stop_reason.to_string(),
            call_id: call.id.clone(),
        }));
    }

    match stop_reason {
        StopReason::ToolUse => {
            let calls: Vec<ToolCall> = response.tool_calls().cloned().collect();
            if calls.is_empty() {
                return Phase::Terminal(Termination::ProtocolError(
                    ProtocolError::ToolUseWithoutCalls,
                ));
            }
            log.append(Turn::assistant(response.content));
            Phase::DispatchingTool(calls)
        }
        StopReason::EndTurn | StopReason::StopSequence => {
            log.append(Turn::assistant(response.content));
            Phase::Terminal(Termination::Completed)
        }
        StopReason::MaxTokens => {
            warn!("Model stopped at the token limit; answer may be truncated");
            log.append(Turn::assistant(response.content));
            Phase::Terminal(Termination::Completed)
        }
        StopReason::Other(other) => {
            Phase::Terminal(Termination::ProtocolError(ProtocolError::UnknownStopReason(other)))
        }
    }
}

/// Await `fut` unless `cancel` fires first.
async fn until_cancelled<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}
