use chrono::{DateTime, Utc};

use super::crypto::AuditKeys;
use super::entry::{AuditEntry, EventType};
use crate::verdict::RiskLevel;

/// Filters for [`AuditLogger::search`](super::AuditLogger::search). Unset
/// fields match everything.
#[derive(Debug, Clone, Default)]
pub struct SearchCriteria {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub event_type: Option<EventType>,
    pub user: Option<String>,
    pub risk_level: Option<RiskLevel>,
}

impl SearchCriteria {
    pub fn is_time_bounded(&self) -> bool {
        self.start.is_some() || self.end.is_some()
    }

    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if self.start.is_some_and(|s| entry.timestamp < s) {
            return false;
        }
        if self.end.is_some_and(|e| entry.timestamp > e) {
            return false;
        }
        if self.event_type.is_some_and(|t| entry.event_type != t) {
            return false;
        }
        if let Some(user) = &self.user
            && &entry.user != user
        {
            return false;
        }
        if self.risk_level.is_some() && entry.risk_level != self.risk_level {
            return false;
        }
        true
    }

    /// An archive rotated at `rotated` holds entries up to that time only.
    pub fn may_contain(&self, rotated: DateTime<Utc>) -> bool {
        self.start.is_none_or(|s| rotated >= s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// One JSON entry per line, exactly as stored.
    Jsonl,
    /// Flattened, with sensitive fields decrypted.
    Csv,
}

pub(crate) const CSV_HEADER: &str =
    "timestamp,eventId,eventType,user,verdict,riskLevel,command,args,pid,cwd,integrityHash";

pub(crate) fn csv_row(entry: &AuditEntry, keys: &AuditKeys) -> String {
    let command = entry
        .command
        .as_ref()
        .map(|c| keys.decrypt_or_sentinel(c))
        .unwrap_or_default();
    let args = entry
        .args
        .as_ref()
        .map(|args| {
            args.iter()
                .map(|a| keys.decrypt_or_sentinel(a))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default();
    let cwd = entry
        .context
        .cwd
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_default();

    [
        entry.timestamp.to_rfc3339(),
        entry.event_id.clone(),
        entry.event_type.as_str().to_string(),
        entry.user.clone(),
        entry.verdict.map(|v| v.as_str().to_string()).unwrap_or_default(),
        entry
            .risk_level
            .map(|r| r.as_str().to_string())
            .unwrap_or_default(),
        command,
        args,
        entry.context.pid.to_string(),
        cwd,
        entry.integrity_hash.clone(),
    ]
    .iter()
    .map(|f| csv_escape(f))
    .collect::<Vec<_>>()
    .join(",")
}

/// Quote a field when it holds a delimiter, quote, or line break.
pub(crate) fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
