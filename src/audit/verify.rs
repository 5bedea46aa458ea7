use std::io::BufRead;
use std::path::PathBuf;

use serde::Serialize;

use super::crypto::AuditKeys;
use super::entry::{HASH_FIELD, REQUIRED_FIELDS};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// Recomputed hash differs from the stored one.
    HashMismatch,
    MissingFields { fields: Vec<String> },
    Unparseable { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineFailure {
    /// 1-based.
    pub line: usize,
    #[serde(flatten)]
    pub kind: FailureKind,
}

/// Result of re-checking every line of a log.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyReport {
    pub path: PathBuf,
    pub total_lines: usize,
    pub valid_lines: usize,
    pub failures: Vec<LineFailure>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed_lines(&self) -> Vec<usize> {
        self.failures.iter().map(|f| f.line).collect()
    }
}

/// Check one line. `None` when the entry is intact.
pub(crate) fn check_line(line: &str, keys: &AuditKeys) -> Option<FailureKind> {
    let mut value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            return Some(FailureKind::Unparseable {
                error: e.to_string(),
            });
        }
    };
    let Some(object) = value.as_object_mut() else {
        return Some(FailureKind::Unparseable {
            error: "entry is not a JSON object".into(),
        });
    };

    let missing: Vec<String> = REQUIRED_FIELDS
        .iter()
        .filter(|f| !object.contains_key(**f))
        .map(|f| f.to_string())
        .collect();
    if !missing.is_empty() {
        return Some(FailureKind::MissingFields { fields: missing });
    }

    let stored = match object.remove(HASH_FIELD) {
        Some(serde_json::Value::String(s)) => s,
        _ => return Some(FailureKind::HashMismatch),
    };
    let payload = match serde_json::to_vec(&value) {
        Ok(p) => p,
        Err(e) => {
            return Some(FailureKind::Unparseable {
                error: e.to_string(),
            });
        }
    };
    if keys.verify(&payload, &stored) {
        None
    } else {
        Some(FailureKind::HashMismatch)
    }
}

/// Check every non-blank line from `reader`.
pub(crate) fn verify_lines(
    reader: impl BufRead,
    keys: &AuditKeys,
) -> std::io::Result<(usize, Vec<LineFailure>)> {
    let mut total = 0;
    let mut failures = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        total += 1;
        if let Some(kind) = check_line(&line, keys) {
            failures.push(LineFailure {
                line: idx + 1,
                kind,
            });
        }
    }
    Ok((total, failures))
}
