//! # CABM Core
//!
//! Domain types, traits, and error definitions for the CABM streaming chat
//! agent. This crate has **zero framework dependencies**; it defines the
//! domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator of the orchestrator is a trait here:
//! - [`Provider`]: the streaming completion source
//! - [`ToolRegistry`]: name → result tool execution
//! - [`HistoryStore`]: durable chat history
//! - [`OptionGenerator`]: follow-up reply suggestions
//!
//! Implementations live in their respective crates, so the orchestrator can be
//! driven by scripted doubles in tests.

pub mod character;
pub mod error;
pub mod history;
pub mod message;
pub mod options;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use character::Character;
pub use error::{Error, Result};
pub use history::HistoryStore;
pub use message::{Message, Role};
pub use options::OptionGenerator;
pub use provider::{ChunkReceiver, CompletionRequest, Provider, StreamChunk};
pub use tool::{Tool, ToolArgument, ToolDescriptor, ToolRegistry, ToolSet};
