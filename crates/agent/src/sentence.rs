//! Sentence gate: is it safe to interrupt the user-visible text here?

/// CJK and Latin sentence terminators, plus the ellipsis.
const TERMINATORS: &[char] = &['。', '！', '？', '!', '?', '.', '…'];

/// True when `emitted`, ignoring trailing whitespace, is non-empty and ends
/// a sentence.
pub fn is_sentence_boundary(emitted: &str) -> bool {
    emitted
        .trim_end()
        .chars()
        .next_back()
        .is_some_and(|c| TERMINATORS.contains(&c))
}
