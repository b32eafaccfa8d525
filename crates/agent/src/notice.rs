//! Notices about tool activity, addressed to the user, the model, or both.
//!
//! The user channel never sees tool error text or raw results; the model
//! gets the details it needs to continue.

use serde_json::{Map, Value};

const PREFIX: &str = "[tools]";

/// Shared by the user-visible channel, the model context and history.
pub fn limit_reached(max_iterations: u32) -> String {
    format!(
        "{PREFIX} Reached the per-request limit of {max_iterations} tool rounds; no further tools will be called."
    )
}

/// Shared by the user-visible channel, the model context and history.
pub fn duplicate_skipped(name: &str, args: &Map<String, Value>) -> String {
    format!(
        "{PREFIX} Skipped duplicate tool request: {name} args={}",
        Value::Object(args.clone())
    )
}

/// User-visible: the tool ran.
pub fn success_brief(name: &str) -> String {
    format!("{PREFIX} {name} completed (ok)")
}

/// User-visible: the tool failed. No details.
pub fn failure_brief(name: &str) -> String {
    format!("{PREFIX} {name} completed (failed)")
}

/// Model-visible result, serialized as JSON and cut to `max_chars`.
pub fn success_detail(name: &str, result: &Value, max_chars: usize) -> String {
    let rendered = result.to_string();
    format!(
        "{PREFIX} {name} completed, result: {}",
        truncate_chars(&rendered, max_chars)
    )
}

/// Model-visible failure with the error text.
pub fn failure_detail(name: &str, error: &str) -> String {
    format!("{PREFIX} {name} failed, error: {error}")
}

/// Reminds the model what its next reply should look like.
pub fn shape_hint(name: &str, ok: bool) -> String {
    let status = if ok { "ok" } else { "error" };
    format!(
        "[note] Shape: AI:[{{content: handled, tool: {name}, status: {status}}}]. \
         The bracketed part is your reply based on the content so far; the next step is yours."
    )
}

/// Model-only restatement of what the user originally asked.
pub fn restated_request(user_message: &str) -> Option<String> {
    (!user_message.is_empty()).then(|| {
        format!("[original user request (continue answering from the tool result)] {user_message}")
    })
}

/// Cut `text` to at most `max_chars` characters, marking the cut with `...`.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}
