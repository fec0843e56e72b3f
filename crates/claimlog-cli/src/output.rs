//! Output formatting for command results.

use clap::ValueEnum;
use claimlog_core::{ConstraintClaim, ConstraintEvent, LogRecord, StreamId};
use serde::Serialize;

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Plain text
    Text,
    /// JSON format
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Derived stream of a constraint value.
#[derive(Debug, Serialize)]
pub struct StreamView<'a> {
    pub constraint: &'a str,
    pub value: &'a str,
    pub stream_id: &'a StreamId,
}

/// Current owner of a constraint value.
#[derive(Debug, Serialize)]
pub struct OwnerView<'a> {
    pub constraint: &'a str,
    pub value: &'a str,
    pub owner: Option<&'a str>,
    pub sequence: Option<u64>,
}

impl<'a> From<&'a ConstraintClaim> for OwnerView<'a> {
    fn from(claim: &'a ConstraintClaim) -> Self {
        Self {
            constraint: &claim.constraint_name,
            value: &claim.key,
            owner: claim.owner.as_deref(),
            sequence: claim.sequence,
        }
    }
}

/// One event of a stream.
#[derive(Debug, Serialize)]
pub struct HistoryEntry {
    pub sequence: u64,
    pub aggregate_type: String,
    pub payload_type: String,
    pub created_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<ConstraintEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<LogRecord> for HistoryEntry {
    fn from(record: LogRecord) -> Self {
        // Undecodable records are still listed so operators can see them.
        let (event, error) = match ConstraintEvent::from_record(&record) {
            Ok(event) => (Some(event), None),
            Err(e) => (None, Some(e.to_string())),
        };
        Self {
            sequence: record.sequence,
            aggregate_type: record.aggregate_type,
            payload_type: record.payload_type,
            created_at: record.created_at,
            event,
            error,
        }
    }
}

/// Result of a claim or release.
#[derive(Debug, Serialize)]
pub struct ActionView<'a> {
    pub action: &'a str,
    pub constraint: &'a str,
    pub value: &'a str,
    pub owner: &'a str,
}

pub fn format_stream(view: &StreamView<'_>, format: OutputFormat) -> Result<String, serde_json::Error> {
    match format {
        OutputFormat::Text => Ok(view.stream_id.to_string()),
        OutputFormat::Json => serde_json::to_string_pretty(view),
    }
}

pub fn format_owner(view: &OwnerView<'_>, format: OutputFormat) -> Result<String, serde_json::Error> {
    match format {
        OutputFormat::Text => Ok(view.owner.unwrap_or("unclaimed").to_string()),
        OutputFormat::Json => serde_json::to_string_pretty(view),
    }
}

pub fn format_history(entries: &[HistoryEntry], format: OutputFormat) -> Result<String, serde_json::Error> {
    match format {
        OutputFormat::Text => {
            if entries.is_empty() {
                return Ok("No events".to_string());
            }
            let lines: Vec<String> = entries.iter().map(format_entry_line).collect();
            Ok(lines.join("\n"))
        }
        OutputFormat::Json => serde_json::to_string_pretty(entries),
    }
}

pub fn format_action(view: &ActionView<'_>, format: OutputFormat) -> Result<String, serde_json::Error> {
    match format {
        OutputFormat::Text => Ok(format!(
            "{} '{}' for '{}' under {}",
            view.action, view.value, view.owner, view.constraint
        )),
        OutputFormat::Json => serde_json::to_string_pretty(view),
    }
}

fn format_entry_line(entry: &HistoryEntry) -> String {
    let detail = match (&entry.event, &entry.error) {
        (Some(ConstraintEvent::Claimed(e)), _) => format!("owner={}", e.owner),
        (Some(ConstraintEvent::Released(_)), _) => String::new(),
        (None, Some(error)) => format!("error={}", error),
        (None, None) => String::new(),
    };
    format!(
        "{:>6}  {:<20}  {:<24}  {}",
        entry.sequence, entry.payload_type, entry.aggregate_type, detail
    )
    .trim_end()
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_text() {
        let claim = ConstraintClaim {
            constraint_name: "Email".to_string(),
            key: "a@b.com".to_string(),
            owner: None,
            sequence: None,
        };
        let view = OwnerView::from(&claim);
        assert_eq!(format_owner(&view, OutputFormat::Text).unwrap(), "unclaimed");
    }

    #[test]
    fn test_history_lists_undecodable_records() {
        let claimed = ConstraintEvent::claimed("Email", "a@b.com", "AGG-1")
            .to_record("ConstraintEmail")
            .unwrap();
        let unknown = LogRecord::new("ConstraintEmail", "ConstraintFrozen", b"{}".to_vec());
        let entries: Vec<HistoryEntry> = vec![claimed.into(), unknown.into()];

        let text = format_history(&entries, OutputFormat::Text).unwrap();
        assert!(text.contains("owner=AGG-1"));
        assert!(text.contains("ConstraintFrozen"));

        let json = format_history(&entries, OutputFormat::Json).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0]["event"]["owner"], "AGG-1");
        assert!(parsed[1]["error"].is_string());
    }
}
