//! Per-iteration context assembly.
//!
//! A turn builds its model input under one of two policies:
//!
//! | Mode | Messages |
//! |------|----------|
//! | Pre-tool | frozen base (system prompt, tool guide, prior history, user message) + accumulated system messages |
//! | Post-tool | system-only subset of the frozen base + assistant tool-request JSON + accumulated system messages |
//!
//! The switch happens the first time a tool request is seen and never
//! reverts, so conversational history drops out once tools are in play.

pub mod assembler;
pub mod guide;
pub mod state;

pub use assembler::ContextAssembler;
pub use guide::tool_guide;
pub use state::IterationState;
