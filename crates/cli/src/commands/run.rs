//! `meshloop run`: Recreate a reference image in Blender.

use anyhow::Context;
use meshloop_agent::{AgentLoop, LoopFailure, LoopOutcome, Task};
use meshloop_core::agent::Termination;
use meshloop_core::event::EventBus;
use meshloop_core::message::ConversationLog;
use meshloop_mcp::McpSession;
use meshloop_providers::{AnthropicProvider, ResilientInvoker, RetryPolicy};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct RunArgs<'a> {
    pub config_path: Option<&'a Path>,
    pub image: PathBuf,
    pub prompt: String,
    pub transcript: Option<PathBuf>,
    pub max_iterations: Option<u32>,
}

pub async fn run(args: RunArgs<'_>) -> anyhow::Result<ExitCode> {
    let mut config = super::load_config(args.config_path)?;
    if let Some(max) = args.max_iterations {
        config.agent.max_iterations = max;
    }
    config.validate()?;

    if config.api_key.is_none() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set ANTHROPIC_API_KEY (or MESHLOOP_API_KEY), or add it to:");
        eprintln!("    {}", meshloop_config::AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        anyhow::bail!("no API key found");
    }

    let image = crate::image::load_image(&args.image)?;
    let task = Task::new(args.prompt).with_image(image);

    let bus = Arc::new(EventBus::default());
    let printer = crate::progress::spawn(bus.subscribe());

    let provider = AnthropicProvider::from_config(&config)?;
    let invoker = ResilientInvoker::new(Arc::new(provider), RetryPolicy::from_config(&config.retry))
        .with_event_bus(bus.clone());
    let agent = AgentLoop::from_config(Arc::new(invoker), &config).with_event_bus(bus.clone());

    let transport = McpSession::spawn(&config.mcp)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current step");
            on_interrupt.cancel();
        }
    });

    info!(image = %args.image.display(), "Starting run");
    let result = agent.run(transport, task, cancel).await;

    // Dropping every sender lets the printer drain and exit
    drop(agent);
    drop(bus);
    let _ = printer.await;

    let log = match &result {
        Ok(outcome) => &outcome.log,
        Err(failure) => &failure.log,
    };
    if let Some(path) = &args.transcript {
        match write_transcript(path, log) {
            Ok(()) => info!(path = %path.display(), turns = log.len(), "Transcript written"),
            Err(e) => warn!(error = %e, "Could not write transcript"),
        }
    }

    Ok(report(&result))
}

/// Print the answer on stdout and a one-line status on stderr.
fn report(result: &Result<LoopOutcome, LoopFailure>) -> ExitCode {
    match result {
        Ok(outcome) => {
            let answer = outcome.answer();
            if !answer.is_empty() {
                println!("{answer}");
            }
            eprintln!();
            eprintln!("  {}", summary(outcome));
            ExitCode::from(exit_code(&outcome.termination))
        }
        Err(failure) => {
            eprintln!();
            eprintln!("  aborted due to {}", failure.error);
            ExitCode::FAILURE
        }
    }
}

fn summary(outcome: &LoopOutcome) -> String {
    let n = outcome.state.iteration;
    match &outcome.termination {
        Termination::Completed => format!("completed after {n} iteration(s)"),
        Termination::CapExhausted => {
            format!("stopped after {n} iterations without completion")
        }
        Termination::ProtocolError(e) => format!("stopped: unusable model response ({e})"),
        Termination::Cancelled => format!("cancelled after {n} iteration(s)"),
    }
}

/// Process exit status for a loop that ended without a fatal error.
fn exit_code(termination: &Termination) -> u8 {
    match termination {
        Termination::Completed | Termination::CapExhausted => 0,
        Termination::ProtocolError(_) => 2,
        Termination::Cancelled => 130,
    }
}

fn write_transcript(path: &Path, log: &ConversationLog) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(log)?;
    std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
