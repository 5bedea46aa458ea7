//! Error types for the fallible parts of the gate.
//!
//! Classification and token redemption never fail; they return structured
//! results instead. These enums cover I/O, configuration, cryptography and
//! outbound delivery.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit log I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("audit entry serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("audit encryption failed: {0}")]
    Crypto(String),

    #[error("audit log directory unusable: {}", .0.display())]
    Directory(PathBuf),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ThreatError {
    #[error("invalid pattern for indicator: {0}")]
    Pattern(#[from] regex::Error),

    #[error("indicator matcher is empty")]
    EmptyMatcher,

    #[error("unknown indicator: {0}")]
    UnknownIndicator(String),
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("webhook delivery failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("backup I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("backup metadata serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("nothing to back up")]
    Empty,
}
