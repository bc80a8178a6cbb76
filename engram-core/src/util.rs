//! Shared helpers: path normalization, JSON-array column codecs, time.
//!
//! Every path that enters the database goes through [`normalize_path`] and
//! every textual array column goes through the JSON codecs here, so the
//! repositories never store platform-specific separators or ad-hoc lists.

use chrono::{DateTime, Utc};

/// Normalize a file path for storage: forward slashes, no leading `./`,
/// no trailing slash.
pub fn normalize_path(path: &str) -> String {
    let mut p = path.trim().replace('\\', "/");
    while let Some(rest) = p.strip_prefix("./") {
        p = rest.to_string();
    }
    while p.len() > 1 && p.ends_with('/') {
        p.pop();
    }
    p
}

/// Encode a string slice as a JSON array column value.
pub fn encode_str_array(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

/// Decode a JSON array column into strings. Malformed cells decode as empty.
pub fn decode_str_array(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

/// Encode an id list as a JSON array column value.
pub fn encode_id_array(items: &[i64]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

/// Decode a JSON array column into ids. Malformed cells decode as empty.
pub fn decode_id_array(raw: &str) -> Vec<i64> {
    serde_json::from_str(raw).unwrap_or_default()
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Parse an RFC 3339 timestamp column, falling back to now on bad data.
pub fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Parse an optional RFC 3339 timestamp column.
pub fn parse_ts_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Tokens longer than three characters, lowercased. Used for similarity
/// matching between decision texts.
pub fn significant_tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 3)
        .map(|t| t.to_lowercase())
        .collect()
}

/// Truncate a string to at most `max` chars, appending an ellipsis marker
/// when anything was cut.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}
