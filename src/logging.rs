use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};

use crate::gate::Classification;
use crate::redact;

/// Where diagnostics and the decision log live.
const LOG_DIR: &str = "~/.local/share/agent-gate";

/// Longest command prefix kept in the decision log.
const MAX_LOGGED_COMMAND: usize = 200;

pub fn log_dir() -> PathBuf {
    PathBuf::from(shellexpand::tilde(LOG_DIR).into_owned())
}

/// Install the process logger: a file sink always, stderr when `verbose`.
///
/// An unknown level name falls back to `info`. Failing to open the log file
/// leaves only the terminal sink, or none.
pub fn init(level: &str, verbose: bool) {
    let level = level.parse::<LevelFilter>().unwrap_or(LevelFilter::Info);
    let config = ConfigBuilder::new().set_time_format_rfc3339().build();

    let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();
    let dir = log_dir();
    if fs::create_dir_all(&dir).is_ok()
        && let Ok(file) = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("agent-gate.log"))
    {
        loggers.push(WriteLogger::new(level, config.clone(), file));
    }
    if verbose {
        loggers.push(TermLogger::new(
            level,
            config,
            TerminalMode::Stderr,
            ColorChoice::Auto,
        ));
    }
    // A logger may already be installed (tests, embedding); keep it.
    let _ = CombinedLogger::init(loggers);
}

/// Append a decision record to ~/.local/share/agent-gate/decisions.log.
/// Best-effort: failures are silently ignored (logging must never block the hook).
pub fn log_decision(command: &str, classification: &Classification) {
    log_decision_in(&log_dir(), command, classification);
}

/// [`log_decision`] into an explicit directory.
pub fn log_decision_in(dir: &Path, command: &str, classification: &Classification) {
    let _ = fs::create_dir_all(dir);
    let Ok(mut file) = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("decisions.log"))
    else {
        return;
    };

    let cmd: String = redact::redact_str(command)
        .replace(['\n', '\t'], " ")
        .chars()
        .take(MAX_LOGGED_COMMAND)
        .collect();
    let reason = redact::redact_str(&classification.reason).replace(['\n', '\t'], "; ");
    let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");

    let _ = writeln!(
        file,
        "{ts}\t{route}\t{approval}\t{cmd}\t{reason}",
        route = classification.routing.routed,
        approval = classification.requires_approval,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{RoutingDecision, RuleSource};
    use crate::verdict::{RiskLevel, Verdict};
    use tempfile::TempDir;

    fn classification(reason: &str) -> Classification {
        let routing = RoutingDecision::safe(reason.to_string(), RuleSource::BuiltIn);
        Classification {
            risk_level: RiskLevel::Low,
            requires_approval: false,
            is_sudo: false,
            source: RuleSource::BuiltIn,
            reason: reason.to_string(),
            verdict: Verdict::Allow,
            routing,
            threat: None,
            consequences: Vec::new(),
            backup: None,
            repeat_warning: false,
        }
    }

    #[test]
    fn decision_line_is_tab_separated_and_redacted() {
        let dir = TempDir::new().unwrap();
        log_decision_in(
            dir.path(),
            "env API_KEY=sk-1234567890abcdef ls",
            &classification("ls is safe"),
        );
        let text = fs::read_to_string(dir.path().join("decisions.log")).unwrap();
        let fields: Vec<&str> = text.trim_end().split('\t').collect();
        assert_eq!(fields.len(), 5);
        assert_eq!(fields[1], "safe");
        assert_eq!(fields[2], "false");
        assert!(!fields[3].contains("sk-1234567890abcdef"));
        assert_eq!(fields[4], "ls is safe");
    }

    #[test]
    fn long_commands_are_truncated() {
        let dir = TempDir::new().unwrap();
        let long = "x".repeat(500);
        log_decision_in(dir.path(), &long, &classification("r"));
        let text = fs::read_to_string(dir.path().join("decisions.log")).unwrap();
        let cmd = text.split('\t').nth(3).unwrap();
        assert_eq!(cmd.len(), MAX_LOGGED_COMMAND);
    }
}
