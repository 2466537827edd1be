// src/util.rs — Shared string helpers

/// Marker appended to event messages cut by [`truncate_message`].
pub const TRUNCATION_MARKER: &str = "... [Message too long, truncated]";

/// Truncate a string to at most `max_len` bytes (UTF-8 safe).
///
/// The cut point is moved back to the nearest character boundary.
pub fn truncate_str(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        s
    } else {
        let mut end = max_len;
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        &s[..end]
    }
}

/// Keep the first `max_chars` characters of `s`, appending
/// [`TRUNCATION_MARKER`] when anything was cut.
pub fn truncate_message(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        None => s.to_string(),
        Some((cut, _)) => format!("{}{}", &s[..cut], TRUNCATION_MARKER),
    }
}
