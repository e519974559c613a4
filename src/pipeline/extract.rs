//! Structured response extraction — pull a JSON payload out of model prose.
//!
//! Models wrap their output in fences, preambles, and sign-offs. This module
//! finds the first substring that actually parses as JSON and returns it as a
//! `serde_json::Value`. On failure the cleaned text is preserved so that
//! prose-only stages can still use it.

use serde_json::Value;

/// No JSON payload could be recovered from the response.
///
/// `cleaned_text` is the fence-stripped response, kept for stages whose
/// output is narrative rather than structured.
#[derive(Debug, Clone)]
pub struct ExtractionFailure {
    pub reason: String,
    pub cleaned_text: String,
}

impl std::fmt::Display for ExtractionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason)
    }
}

/// Strip code fences and stray backticks from a model response.
pub fn strip_wrappers(text: &str) -> String {
    text.replace("```json", " ")
        .replace("```", " ")
        .replace('`', " ")
        .trim()
        .to_string()
}

/// Extract the first JSON object or array that parses from a model response.
///
/// Scans openers (`{` or `[`) left to right; for each opener, candidate
/// closers of the same kind are tried greedily from the last occurrence
/// backwards. The first candidate that deserializes wins, so a broken block
/// followed by a valid one still extracts, and nested structures resolve to
/// the outermost pair.
pub fn extract_json(text: &str) -> Result<Value, ExtractionFailure> {
    let cleaned = strip_wrappers(text);
    let bytes = cleaned.as_bytes();

    for start in 0..bytes.len() {
        let close = match bytes[start] {
            b'{' => b'}',
            b'[' => b']',
            _ => continue,
        };
        for end in (start..bytes.len()).rev() {
            if bytes[end] != close {
                continue;
            }
            // Both ends are single-byte ASCII, so the slice is char-aligned.
            if let Ok(value) = serde_json::from_str::<Value>(&cleaned[start..=end]) {
                return Ok(value);
            }
        }
    }

    let reason = if cleaned.contains('{') || cleaned.contains('[') {
        "no candidate block parses as JSON".to_string()
    } else {
        "no JSON object or array in response".to_string()
    };
    Err(ExtractionFailure {
        reason,
        cleaned_text: cleaned,
    })
}
