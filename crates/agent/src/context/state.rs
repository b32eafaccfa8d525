//! Mutable per-turn iteration state.

use cabm_core::message::Message;

use crate::governor::ToolGovernor;

/// Everything a turn accumulates across iterations. Owned by exactly one
/// turn and dropped when it ends.
#[derive(Debug)]
pub struct IterationState {
    pub governor: ToolGovernor,
    /// Assistant JSON objects that carried a tool request, oldest first.
    pub tool_request_history: Vec<Message>,
    /// Tool results, hints and notices produced during this turn.
    pub system_messages: Vec<Message>,
    /// Set on the first tool request; never cleared.
    pub has_tool_context: bool,
}

impl IterationState {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            governor: ToolGovernor::new(max_iterations),
            tool_request_history: Vec::new(),
            system_messages: Vec::new(),
            has_tool_context: false,
        }
    }

    /// Remember the assistant JSON that asked for a tool and switch to the
    /// post-tool context.
    pub fn record_tool_request(&mut self, assistant_json: &str) {
        self.tool_request_history
            .push(Message::assistant(assistant_json));
        self.has_tool_context = true;
    }

    pub fn push_system(&mut self, content: impl Into<String>) {
        self.system_messages.push(Message::system(content));
    }
}
