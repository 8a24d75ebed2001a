// src/utils/html.rs

/// Sanitizes reviewer feedback before it is stored and shown to students.
///
/// Whitelist based: harmless formatting such as `<b>` or `<p>` survives,
/// `<script>` (with its content), `<iframe>` and event handler attributes do not.
/// Returns `None` when nothing readable is left.
pub fn clean_feedback(input: &str) -> Option<String> {
    let cleaned = ammonia::clean(input);
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
