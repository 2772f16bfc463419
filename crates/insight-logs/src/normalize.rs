//! Mapping raw source lines and index records onto `LogEntry`.

use chrono::DateTime;

use insight_backends::IndexRecord;
use insight_core::{LogEntry, DEFAULT_SEVERITY};

/// RFC 3339 timestamp → epoch milliseconds.
pub fn parse_timestamp_millis(raw: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(raw).ok().map(|t| t.timestamp_millis())
}

/// Split an orchestrator log line into its timestamp prefix and message.
///
/// A line whose prefix does not parse is kept whole with timestamp `0`.
pub fn frame_line(entity: &str, line: &str) -> LogEntry {
    let (timestamp, message) = match line.split_once(' ') {
        Some((prefix, rest)) => match parse_timestamp_millis(prefix) {
            Some(ts) => (ts, rest),
            None => (0, line),
        },
        None => match parse_timestamp_millis(line) {
            Some(ts) => (ts, ""),
            None => (0, line),
        },
    };
    LogEntry {
        entity: entity.to_string(),
        timestamp,
        severity: DEFAULT_SEVERITY.to_string(),
        message: message.to_string(),
    }
}

/// Upper-cased severity; missing, empty and `DEFAULT` become `INFO`.
pub fn normalize_severity(raw: Option<&str>) -> String {
    match raw.map(str::trim) {
        None | Some("") => DEFAULT_SEVERITY.to_string(),
        Some(s) if s.eq_ignore_ascii_case("default") => DEFAULT_SEVERITY.to_string(),
        Some(s) => s.to_ascii_uppercase(),
    }
}

pub fn from_index_record(record: &IndexRecord) -> LogEntry {
    let message = match (&record.text_payload, &record.json_payload) {
        (Some(text), _) => text.clone(),
        (None, Some(json)) => match json.get("message").and_then(|m| m.as_str()) {
            Some(msg) => msg.to_string(),
            None => json.to_string(),
        },
        (None, None) => String::new(),
    };
    LogEntry {
        entity: record
            .resource
            .labels
            .get("container_name")
            .cloned()
            .unwrap_or_default(),
        timestamp: record
            .timestamp
            .as_deref()
            .and_then(parse_timestamp_millis)
            .unwrap_or(0),
        severity: normalize_severity(record.severity.as_deref()),
        message,
    }
}
