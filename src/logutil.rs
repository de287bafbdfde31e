//! Helpers for logging user-originated text safely: chat messages can carry
//! newlines, control characters, and arbitrarily long payloads, none of
//! which belong in a single-line log record.

/// Escape a string for single-line logging and cap it at roughly
/// `max_bytes` of output. Control characters become escapes (`\n`, `\r`,
/// `\t`, `\xNN`), backslashes are doubled, and truncation never lands
/// inside a multi-byte character.
pub fn preview(s: &str, max_bytes: usize) -> String {
    let mut out = String::with_capacity(s.len().min(max_bytes) + 8);
    let mut used = 0usize;
    for ch in s.chars() {
        if used + ch.len_utf8() > max_bytes {
            out.push('…');
            break;
        }
        used += ch.len_utf8();
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                use std::fmt::Write;
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}
