//! The tool guide: a system message teaching the model the envelope
//! protocol and listing the registered tools.

use cabm_core::tool::ToolDescriptor;

/// Render the guide, or `None` when there are no tools to describe.
pub fn tool_guide(descriptors: &[ToolDescriptor]) -> Option<String> {
    if descriptors.is_empty() {
        return None;
    }

    let mut lines: Vec<String> = [
        "[Tool usage guide]",
        "Always output exactly one valid JSON object (no code fences).",
        "JSON shape: { content:string, mood?:string, tool_request?:{ name:string, args:object, reason:string } }",
        "To call a tool, add tool_request to the same JSON. If you already told the user part of the answer, do not repeat it; just continue.",
        "After the system returns a tool result, output a new single JSON. Add tool_request again if another tool is needed; otherwise give only content. Several rounds are allowed until the task is done or the limit is reached.",
        "Strict rules:",
        "- Do not restate text the user has already seen; carry on from where you stopped.",
        "- Keep the original punctuation; do not drop or rewrite it.",
        "- One JSON object per reply, with nothing before or after it.",
        "[Tools]",
    ]
    .into_iter()
    .map(String::from)
    .collect();

    for tool in descriptors {
        let args = tool
            .arguments
            .iter()
            .map(|a| format!("{}:{}", a.name, a.hint))
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("- {}: {} args: {}", tool.name, tool.description, args));
    }

    Some(lines.join("\n"))
}
