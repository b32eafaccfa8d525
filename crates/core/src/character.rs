//! The persona the assistant speaks as.

use serde::{Deserialize, Serialize};

/// Character context: the system prompt that opens every turn and the
/// persona handed to the option generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Character {
    pub id: String,
    pub name: String,
    pub system_prompt: String,
}

impl Default for Character {
    fn default() -> Self {
        Self {
            id: "default".into(),
            name: "Assistant".into(),
            system_prompt: "You are a helpful assistant. Always answer with a single JSON object \
                            of the form {\"mood\": string, \"content\": string}."
                .into(),
        }
    }
}
