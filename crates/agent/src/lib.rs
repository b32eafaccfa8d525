//! The agentic streaming orchestrator.
//!
//! A turn streams the model's JSON envelope, forwards `mood` and `content`
//! deltas as they grow, and runs at most one tool per model response:
//!
//! 1. **Stream** the completion and rescan the accumulated text per chunk
//! 2. **Emit** mood/content deltas from the last complete envelope
//! 3. **Detect** a `tool_request` and hold it until the visible text ends a sentence
//! 4. **Execute** the tool, fold its result into the context, stream again
//! 5. **Finalize** when a response carries no tool request
//!
//! The loop stops at the per-turn tool limit, on upstream failure, or when
//! the caller stops listening.

pub mod context;
pub mod delta;
pub mod envelope;
pub mod extractor;
pub mod governor;
pub mod notice;
pub mod options;
pub mod orchestrator;
pub mod sentence;
pub mod stream_event;

#[cfg(test)]
mod test_helpers;

pub use context::{ContextAssembler, IterationState};
pub use envelope::{Envelope, ToolRequest};
pub use governor::{Admission, ToolGovernor};
pub use options::CompletionOptionGenerator;
pub use orchestrator::{
    Orchestrator, Turn, TurnFailure, TurnOutcome, TurnPhase, TurnReport, TurnSettings,
    TurnTranscript,
};
pub use stream_event::TurnEvent;
