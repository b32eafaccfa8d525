//! Incremental JSON extraction over an accumulating token stream.
//!
//! The model streams one JSON object per response, token by token. After
//! every chunk the whole text so far is rescanned and the last balanced
//! top-level `{...}` block that parses as JSON is returned. Unterminated
//! trailing objects are simply not visible yet.

/// Return the last complete, valid top-level JSON object in `text`.
///
/// Braces inside string literals are ignored. A `"` toggles string mode
/// anywhere in the text, escapes included, so prose containing an odd
/// number of quotes hides everything after it.
pub fn extract_last_object(text: &str) -> Option<&str> {
    let span = last_balanced_span(text, b'{', b'}')?;
    let candidate = &text[span.0..span.1];
    serde_json::from_str::<serde::de::IgnoredAny>(candidate)
        .is_ok()
        .then_some(candidate)
}

/// Return the last complete, valid top-level JSON array in `text`.
pub fn extract_last_array(text: &str) -> Option<&str> {
    let span = last_balanced_span(text, b'[', b']')?;
    let candidate = &text[span.0..span.1];
    serde_json::from_str::<serde::de::IgnoredAny>(candidate)
        .is_ok()
        .then_some(candidate)
}

/// Byte range of the most recent `open ... close` span that returned to
/// depth zero. Stray closers at depth zero are ignored.
fn last_balanced_span(text: &str, open: u8, close: u8) -> Option<(usize, usize)> {
    let mut in_string = false;
    let mut escaped = false;
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut last = None;

    // Delimiters are ASCII, so byte offsets are always char boundaries
    for (i, &b) in text.as_bytes().iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        if b == b'"' {
            in_string = true;
        } else if b == open {
            if depth == 0 {
                start = i;
            }
            depth += 1;
        } else if b == close && depth > 0 {
            depth -= 1;
            if depth == 0 {
                last = Some((start, i + 1));
            }
        }
    }

    last
}
