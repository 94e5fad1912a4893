/// One historical agent invocation, as read from a run-log CSV snapshot.
///
/// Rows arrive as raw text (`RawRecord`) and are coerced into typed
/// `AgentRunRecord`s before anything touches the store, so a bad cell
/// anywhere in the file fails the whole load.
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;

/// Column names every input file must carry (case-sensitive).
pub const REQUIRED_COLUMNS: [&str; 9] = [
    "timestamp",
    "user_id",
    "task_type",
    "agent_version",
    "resolution_time_seconds",
    "user_accepted",
    "user_rating",
    "abstained",
    "error_occurred",
];

/// Storage format for timestamps. SQLite's `date()` truncates this to the day.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// A CSV row before type coercion. Extra columns in the file are ignored.
#[derive(Debug, Deserialize)]
pub struct RawRecord {
    pub timestamp: String,
    pub user_id: String,
    pub task_type: String,
    pub agent_version: String,
    pub resolution_time_seconds: String,
    pub user_accepted: String,
    pub user_rating: String,
    pub abstained: String,
    pub error_occurred: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentRunRecord {
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub task_type: String,
    /// `None` when the cell is empty; such rows group together.
    pub agent_version: Option<String>,
    pub resolution_time_seconds: f64,
    pub user_accepted: bool,
    pub user_rating: Option<f64>,
    pub abstained: bool,
    pub error_occurred: bool,
}

impl AgentRunRecord {
    /// Timestamp rendered in the store's text format.
    pub fn timestamp_text(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }
}

impl TryFrom<RawRecord> for AgentRunRecord {
    type Error = String;

    fn try_from(raw: RawRecord) -> Result<Self, Self::Error> {
        let timestamp = parse_timestamp(&raw.timestamp)?;
        let user_id = required_text("user_id", &raw.user_id)?;
        let task_type = required_text("task_type", &raw.task_type)?;
        let agent_version = match raw.agent_version.trim() {
            "" => None,
            v => Some(v.to_string()),
        };

        let resolution_time_seconds = parse_number(&raw.resolution_time_seconds)
            .map_err(|e| format!("resolution_time_seconds: {e}"))?;
        if resolution_time_seconds < 0.0 {
            return Err(format!(
                "resolution_time_seconds: negative value {resolution_time_seconds}"
            ));
        }

        let user_rating =
            parse_optional_number(&raw.user_rating).map_err(|e| format!("user_rating: {e}"))?;

        Ok(Self {
            timestamp,
            user_id,
            task_type,
            agent_version,
            resolution_time_seconds,
            user_accepted: parse_bool(&raw.user_accepted)
                .map_err(|e| format!("user_accepted: {e}"))?,
            user_rating,
            abstained: parse_bool(&raw.abstained).map_err(|e| format!("abstained: {e}"))?,
            error_occurred: parse_bool(&raw.error_occurred)
                .map_err(|e| format!("error_occurred: {e}"))?,
        })
    }
}

/// Identifier cells are stored exactly as read; only blank ones are rejected.
fn required_text(field: &str, value: &str) -> Result<String, String> {
    if value.trim().is_empty() {
        return Err(format!("{field}: empty value"));
    }
    Ok(value.to_string())
}

/// Parse a timestamp cell. Offsets are normalized to UTC; naive values are
/// taken as UTC; a bare date means midnight.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    let v = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(v) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(v, fmt) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(v, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc());
        }
    }
    Err(format!("timestamp: unparseable value {v:?}"))
}

pub fn parse_bool(value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" | "y" => Ok(true),
        "false" | "f" | "0" | "no" | "n" => Ok(false),
        other => Err(format!("not a boolean: {other:?}")),
    }
}

fn parse_number(value: &str) -> Result<f64, String> {
    let v = value.trim();
    match v.parse::<f64>() {
        Ok(n) if n.is_finite() => Ok(n),
        _ => Err(format!("not a number: {v:?}")),
    }
}

fn parse_optional_number(value: &str) -> Result<Option<f64>, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "nan" | "null" | "none" => Ok(None),
        _ => parse_number(value).map(Some),
    }
}
