//! Human-readable progress on stderr, fed by the domain event bus.

use meshloop_core::event::DomainEvent;
use std::sync::Arc;
use tokio::sync::broadcast::{Receiver, error::RecvError};
use tokio::task::JoinHandle;

/// One progress line for an event.
pub fn describe(event: &DomainEvent) -> String {
    match event {
        DomainEvent::ModelInvoked {
            iteration,
            stop_reason,
            tokens_used,
            ..
        } => format!(
            "  model replied (iteration {iteration}, stop: {}, {tokens_used} tokens)",
            stop_reason.as_deref().unwrap_or("none")
        ),
        DomainEvent::RetryScheduled {
            attempt,
            max_attempts,
            delay_ms,
            reason,
            ..
        } => format!(
            "  model service {reason}, retrying in {:.1}s (attempt {attempt}/{max_attempts})",
            *delay_ms as f64 / 1000.0
        ),
        DomainEvent::ToolExecuted {
            tool_name,
            success,
            duration_ms,
            ..
        } => {
            let status = if *success { "ok" } else { "failed" };
            format!("  tool {tool_name} {status} ({duration_ms} ms)")
        }
        DomainEvent::LoopTerminated {
            reason, iterations, ..
        } => format!("  loop finished: {reason} after {iterations} iteration(s)"),
    }
}

/// Print events until the bus is dropped.
pub fn spawn(mut rx: Receiver<Arc<DomainEvent>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => eprintln!("{}", describe(&event)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Progress printer lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
