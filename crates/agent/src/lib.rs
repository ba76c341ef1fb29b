//! The orchestration loop: the heart of meshloop.
//!
//! The loop drives one task to completion:
//!
//! 1. **Connect** to the tool provider and fetch its catalog
//! 2. **Send** the user's prompt and image to the model
//! 3. **If tool calls**: dispatch them in order, append the results, loop back to step 2
//! 4. **If completion**: return the collected text
//!
//! The loop stops early when the iteration cap is reached, when the model
//! sends something it cannot act on, or when the caller cancels.

pub mod loop_runner;

pub use loop_runner::{AgentLoop, LoopFailure, LoopOutcome, Task};
