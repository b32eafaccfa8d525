//! Delta emission: turn cumulative envelope snapshots into incremental
//! user-visible changes.

use crate::envelope::Envelope;

/// One observable change produced from a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delta {
    Mood(String),
    Content(String),
}

/// Tracks the last emitted `mood` and `content` of the current response.
///
/// Content rule: a value shorter (in chars) than the baseline is a full
/// replacement and is emitted verbatim; otherwise only the suffix past the
/// baseline is emitted. Once suspended, content is tracked no further.
#[derive(Debug, Default)]
pub struct DeltaTracker {
    mood: Option<String>,
    content: String,
    content_chars: usize,
    suspended: bool,
}

impl DeltaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare `envelope` against the baseline and return what changed.
    pub fn observe(&mut self, envelope: &Envelope) -> Vec<Delta> {
        let mut deltas = Vec::new();

        if let Some(mood) = &envelope.mood
            && self.mood.as_ref() != Some(mood)
        {
            self.mood = Some(mood.clone());
            deltas.push(Delta::Mood(mood.clone()));
        }

        if !self.suspended
            && let Some(content) = &envelope.content
            && *content != self.content
        {
            let chars = content.chars().count();
            if chars < self.content_chars {
                deltas.push(Delta::Content(content.clone()));
            } else {
                let suffix: String = content.chars().skip(self.content_chars).collect();
                if !suffix.is_empty() {
                    deltas.push(Delta::Content(suffix));
                }
            }
            self.content = content.clone();
            self.content_chars = chars;
        }

        deltas
    }

    /// Stop emitting content for the rest of this response.
    pub fn suspend(&mut self) {
        self.suspended = true;
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// The content baseline: everything the user has been shown.
    pub fn emitted_content(&self) -> &str {
        &self.content
    }
}
