//! Orchestration loop state and termination types.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Mutable bookkeeping owned by one run of the orchestration loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopState {
    /// Completed tool-dispatch rounds; never decreases
    pub iteration: u32,

    /// Safety cap on `iteration`
    pub max_iterations: u32,

    /// Text blocks from every assistant turn, in arrival order
    pub final_text: Vec<String>,

    pub terminated: bool,
}

impl LoopState {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            iteration: 0,
            max_iterations,
            final_text: Vec::new(),
            terminated: false,
        }
    }

    /// Record one finished dispatch round.
    pub fn advance(&mut self) {
        self.iteration = self.iteration.saturating_add(1);
    }

    /// No further model call may be issued.
    pub fn cap_reached(&self) -> bool {
        self.iteration >= self.max_iterations
    }
}

/// Why a loop run ended without a fatal error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum Termination {
    /// The model signalled ordinary completion
    Completed,
    /// The iteration cap was hit before completion; text is partial
    CapExhausted,
    /// The model's response could not drive the protocol forward
    ProtocolError(ProtocolError),
    /// The caller cancelled the run
    Cancelled,
}

impl Termination {
    /// Soft successes exit the process with status 0.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed | Self::CapExhausted)
    }
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::CapExhausted => f.write_str("cap_exhausted"),
            Self::ProtocolError(e) => write!(f, "protocol_error: {e}"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}
