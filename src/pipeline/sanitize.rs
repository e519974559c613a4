// Sanitize caller-supplied text before it is embedded in a model prompt.
// Removes invisible Unicode, neutralizes role-marker lines, caps length.

/// Maximum prompt length sent to the model (characters).
const MAX_PROMPT_LENGTH: usize = 20_000;

/// Sanitize a rendered prompt for model consumption.
///
/// Site and questionnaire data is free-form user input; anything in it that
/// looks like a chat role marker is dropped, invisible characters are
/// stripped, and the result is capped at a fixed length.
pub fn sanitize_for_prompt(raw: &str) -> String {
    let cleaned = remove_invisible_chars(raw);
    let (no_markers, removed) = remove_role_markers(&cleaned);

    if removed > 0 {
        tracing::warn!(
            removed_lines = removed,
            "Role-marker lines removed from prompt input"
        );
    }

    truncate_chars(&no_markers, MAX_PROMPT_LENGTH)
}

/// Remove invisible Unicode characters that could steer model behavior.
/// Preserves standard whitespace (space, newline, tab).
fn remove_invisible_chars(text: &str) -> String {
    text.chars()
        .filter(|c| {
            if *c == ' ' || *c == '\n' || *c == '\t' || *c == '\r' {
                return true;
            }
            if matches!(
                *c,
                '\u{200B}'  // Zero-width space
                | '\u{200C}' // Zero-width non-joiner
                | '\u{200D}' // Zero-width joiner
                | '\u{200E}' // Left-to-right mark
                | '\u{200F}' // Right-to-left mark
                | '\u{202A}'..='\u{202E}' // Directional embeddings and overrides
                | '\u{2060}' // Word joiner
                | '\u{FEFF}' // BOM / zero-width no-break space
            ) {
                return false;
            }
            !c.is_control()
        })
        .collect()
}

/// Check if a line opens with a chat role marker.
fn is_role_marker(trimmed: &str) -> bool {
    let lower = trimmed.to_lowercase();
    lower.starts_with("system:")
        || lower.starts_with("assistant:")
        || lower.starts_with("user:")
        || lower.starts_with("[system]")
        || lower.starts_with("[assistant]")
        || lower.starts_with("[inst]")
        || lower.starts_with("[/inst]")
}

fn remove_role_markers(text: &str) -> (String, usize) {
    let mut removed = 0;
    let kept: Vec<&str> = text
        .lines()
        .filter(|line| {
            if is_role_marker(line.trim()) {
                removed += 1;
                false
            } else {
                true
            }
        })
        .collect();
    (kept.join("\n"), removed)
}

/// Truncate to a maximum number of characters on a char boundary.
fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    text.chars().take(max).collect()
}
