use chrono::{DateTime, Utc};

pub const TRUNCATION_MARKER: &str = "\n\n[Content truncated due to size]";

/// Current UTC time, never earlier than `floor`.
///
/// Ledger timestamps must be non-decreasing even when the wall clock steps
/// backwards between two writes.
pub fn now_not_before(floor: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    match floor {
        Some(floor) if floor > now => floor,
        _ => now,
    }
}

/// Cut `input` to at most `max_chars` Unicode characters, appending the
/// truncation marker when anything was dropped.
pub fn truncate_content(input: &str, max_chars: usize) -> String {
    match input.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => {
            let mut out = String::with_capacity(byte_idx + TRUNCATION_MARKER.len());
            out.push_str(&input[..byte_idx]);
            out.push_str(TRUNCATION_MARKER);
            out
        }
        None => input.to_string(),
    }
}

/// Shorten free text for log lines and placeholder messages.
pub fn truncate_with_ellipsis(input: &str, max_chars: usize) -> String {
    let clean: String = input.chars().filter(|c| !c.is_control()).collect();
    if clean.chars().count() > max_chars {
        let mut s: String = clean.chars().take(max_chars).collect();
        s.push('…');
        s
    } else {
        clean
    }
}
