use chrono::NaiveDateTime;

/// Truncate a string to a maximum length, adding ellipsis if needed
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{}...", truncated)
    }
}

/// Format an optional string, returning a default if None
pub fn format_optional(value: &Option<String>, default: &str) -> String {
    value.as_deref().unwrap_or(default).to_string()
}

/// Date only, e.g. `Mar 14, 2025`
pub fn format_date(date: &NaiveDateTime) -> String {
    date.format("%b %d, %Y").to_string()
}

/// Date and time, e.g. `Mar 14, 2025 09:30`
pub fn format_datetime(date: &NaiveDateTime) -> String {
    date.format("%b %d, %Y %H:%M").to_string()
}
