use std::io::IsTerminal;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::verdict::{RiskLevel, Verdict};

/// Environment variables whose values are fingerprinted into every entry.
const SECURITY_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "SHELL",
    "SUDO_USER",
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "DYLD_INSERT_LIBRARIES",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    CommandExecution,
    SecurityViolation,
    ConfigurationChange,
    SystemEvent,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::CommandExecution => "command_execution",
            EventType::SecurityViolation => "security_violation",
            EventType::ConfigurationChange => "configuration_change",
            EventType::SystemEvent => "system_event",
        }
    }
}

/// A sensitive field after encryption. All parts are base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedField {
    pub data: String,
    pub iv: String,
    pub tag: String,
}

/// Process facts captured when the entry is logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryContext {
    pub pid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ppid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    pub tty: bool,
    /// Truncated SHA-256 over the security-relevant environment.
    pub env_hash: String,
}

impl EntryContext {
    pub fn capture() -> Self {
        Self {
            pid: std::process::id(),
            ppid: parent_pid(),
            cwd: std::env::current_dir().ok(),
            tty: std::io::stdin().is_terminal(),
            env_hash: env_fingerprint(),
        }
    }
}

#[cfg(unix)]
fn parent_pid() -> Option<u32> {
    Some(std::os::unix::process::parent_id())
}

#[cfg(not(unix))]
fn parent_pid() -> Option<u32> {
    None
}

fn env_fingerprint() -> String {
    let mut hasher = Sha256::new();
    for name in SECURITY_ENV_VARS {
        let value = std::env::var(name).unwrap_or_default();
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
        hasher.update(b"\n");
    }
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}

/// One line of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event_id: String,
    pub event_type: EventType,
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<EncryptedField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<EncryptedField>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<RiskLevel>,
    pub context: EntryContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub integrity_hash: String,
}

/// JSON keys every entry must carry.
pub const REQUIRED_FIELDS: &[&str] = &[
    "timestamp",
    "eventId",
    "eventType",
    "user",
    "context",
    "integrityHash",
];

/// JSON key excluded from its own hash.
pub const HASH_FIELD: &str = "integrityHash";

/// What a caller hands to the logger; sensitive fields are still plaintext.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    pub event_type: EventType,
    pub user: Option<String>,
    pub command: Option<String>,
    pub args: Option<Vec<String>>,
    pub verdict: Option<Verdict>,
    pub risk_level: Option<RiskLevel>,
    pub metadata: Option<serde_json::Value>,
}

impl AuditEvent {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            user: None,
            command: None,
            args: None,
            verdict: None,
            risk_level: None,
            metadata: None,
        }
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn args(mut self, args: Vec<String>) -> Self {
        self.args = Some(args);
        self
    }

    pub fn verdict(mut self, verdict: Verdict) -> Self {
        self.verdict = Some(verdict);
        self
    }

    pub fn risk_level(mut self, risk: RiskLevel) -> Self {
        self.risk_level = Some(risk);
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Events that page someone.
    pub fn is_alerting(&self) -> bool {
        self.risk_level == Some(RiskLevel::Critical)
            || self.event_type == EventType::SecurityViolation
    }
}

/// The user from the environment, for events that don't name one.
pub fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}
