//! Follow-up option generation through a second, non-streaming completion.

use std::sync::Arc;

use async_trait::async_trait;
use cabm_core::character::Character;
use cabm_core::error::Error;
use cabm_core::message::{Message, Role};
use cabm_core::options::OptionGenerator;
use cabm_core::provider::{CompletionRequest, Provider};
use tracing::debug;

use crate::extractor::extract_last_array;

const DEFAULT_COUNT: usize = 3;
const DEFAULT_WINDOW: usize = 6;
const MAX_OPTION_CHARS: usize = 40;

/// Asks the model for a few short replies the user might send next.
pub struct CompletionOptionGenerator {
    provider: Arc<dyn Provider>,
    model: String,
    count: usize,
    window: usize,
}

impl CompletionOptionGenerator {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            count: DEFAULT_COUNT,
            window: DEFAULT_WINDOW,
        }
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count.max(1);
        self
    }

    fn prompt(&self, history: &[Message], character: &Character, last_user_message: &str) -> Vec<Message> {
        let instruction = format!(
            "You suggest replies for the user talking to {}. \
             Output only a JSON array of {} short strings, each under {} characters, \
             written in the user's language and voice. No other text.",
            character.name, self.count, MAX_OPTION_CHARS
        );

        // Tool notices are noise here
        let skip = history.len().saturating_sub(self.window);
        let transcript = history[skip..]
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n");

        vec![
            Message::system(instruction),
            Message::user(format!(
                "Conversation:\n{transcript}\n\nThe user last said: {last_user_message}\nSuggest the user's next replies."
            )),
        ]
    }
}

#[async_trait]
impl OptionGenerator for CompletionOptionGenerator {
    async fn suggest(
        &self,
        history: &[Message],
        character: &Character,
        last_user_message: &str,
    ) -> Result<Vec<String>, Error> {
        let mut request = CompletionRequest::new(&self.model, self.prompt(history, character, last_user_message));
        request.temperature = 0.9;
        request.max_tokens = Some(256);

        let text = self.provider.complete(request).await?;
        Ok(parse_options(&text, self.count))
    }
}

/// Pull up to `count` non-empty strings out of the last JSON array in `text`.
/// Anything unparseable yields no options.
pub fn parse_options(text: &str, count: usize) -> Vec<String> {
    let Some(array) = extract_last_array(text) else {
        debug!("Option reply contained no JSON array");
        return Vec::new();
    };
    let values: Vec<serde_json::Value> = serde_json::from_str(array).unwrap_or_default();
    values
        .into_iter()
        .filter_map(|v| match v {
            serde_json::Value::String(s) => Some(s.trim().to_string()),
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .take(count)
        .collect()
}
