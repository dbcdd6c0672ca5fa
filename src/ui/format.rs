//! Small display formatters shared by the player views.

use std::time::Duration;

/// Render a duration as `m:ss`. Minutes are not capped, so an hour shows as
/// `60:00`.
pub fn format_duration(d: Duration) -> String {
    let s = d.as_secs();
    format!("{}:{:02}", s / 60, s % 60)
}

/// Render a byte count as `B`, `KB`, or `MB` with one decimal.
pub fn format_bytes(bytes: usize) -> String {
    if bytes < 1024 {
        return format!("{bytes}B");
    }
    let kb = bytes as f64 / 1024.0;
    if kb < 1024.0 {
        return format!("{kb:.1}KB");
    }
    format!("{:.1}MB", kb / 1024.0)
}

/// Truncate text to `max_len` characters, replacing the tail with `...` when
/// there is room for it.
pub fn truncate_text(text: &str, max_len: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_len {
        return text.to_string();
    }
    if max_len <= 3 {
        return chars[..max_len].iter().collect();
    }
    let mut out: String = chars[..max_len - 3].iter().collect();
    out.push_str("...");
    out
}
