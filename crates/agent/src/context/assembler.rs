//! Context assembler: the frozen per-turn base and the two assembly modes.
//!
//! # Determinism
//!
//! The base is computed once when the turn starts and never changes, so
//! identical iteration state always yields identical model input.

use cabm_core::message::{Message, Role};

use super::state::IterationState;

/// Holds the frozen message base for one turn.
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    frozen_base: Vec<Message>,
    system_only: Vec<Message>,
}

impl ContextAssembler {
    /// Freeze the base for a turn.
    ///
    /// Order: system prompt (skipped when empty), prior history, the new
    /// user message. The tool guide, if any, goes right after the first
    /// system message, or first when there is none.
    ///
    /// The post-tool view keeps every `system` message of the base, and
    /// persisted tool notices from earlier turns are `system` messages too.
    /// That view therefore grows with the history window (`history_window`,
    /// 200 messages by default) until older notices fall out of it.
    pub fn freeze(
        system_prompt: &str,
        tool_guide: Option<String>,
        prior_history: Vec<Message>,
        user_message: &str,
    ) -> Self {
        let mut base = Vec::with_capacity(prior_history.len() + 3);
        if !system_prompt.trim().is_empty() {
            base.push(Message::system(system_prompt));
        }
        base.extend(prior_history);
        base.push(Message::user(user_message));

        if let Some(guide) = tool_guide {
            let at = base
                .iter()
                .position(Message::is_system)
                .map_or(0, |idx| idx + 1);
            base.insert(at, Message::system(guide));
        }

        let system_only = base
            .iter()
            .filter(|m| m.role == Role::System)
            .cloned()
            .collect();

        Self {
            frozen_base: base,
            system_only,
        }
    }

    /// Messages for the next completion call.
    pub fn assemble(&self, state: &IterationState) -> Vec<Message> {
        let mut messages = if state.has_tool_context {
            let mut m = self.system_only.clone();
            m.extend(state.tool_request_history.iter().cloned());
            m
        } else {
            self.frozen_base.clone()
        };
        messages.extend(state.system_messages.iter().cloned());
        messages
    }

    pub fn frozen_base(&self) -> &[Message] {
        &self.frozen_base
    }

    pub fn system_only(&self) -> &[Message] {
        &self.system_only
    }
}
