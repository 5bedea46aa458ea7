//! Execution Sink: spawn an approved `(command, args)` tuple.
//!
//! The tuple is passed to the OS as an argument vector, never through a
//! shell, except for builtins which have no executable and must be run by
//! `sh -c` with every word quoted.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::process::Command;
use tokio::time::timeout;

use crate::config::ExecConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// The child ran to completion; non-zero exit codes are not errors.
    Completed {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },
    SpawnFailed { error: String },
    /// Killed after the wall-clock limit.
    TimedOut { after_ms: u64 },
}

impl ExecutionOutcome {
    pub fn success(&self) -> bool {
        matches!(self, ExecutionOutcome::Completed { exit_code: 0, .. })
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecutionOutcome::Completed { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }
}

/// Something that can run an approved command.
#[async_trait]
pub trait ExecutionSink: Send + Sync {
    async fn execute(&self, command: &str, args: &[String], requires_shell: bool)
    -> ExecutionOutcome;
}

/// Spawns real processes with a hard timeout.
pub struct ProcessExecutor {
    timeout: Duration,
    max_output_bytes: usize,
}

impl ProcessExecutor {
    pub fn new(timeout: Duration, max_output_bytes: usize) -> Self {
        Self {
            timeout,
            max_output_bytes,
        }
    }

    pub fn from_config(config: &ExecConfig) -> Self {
        Self::new(
            Duration::from_secs(config.timeout_secs),
            config.max_output_bytes,
        )
    }

    fn truncate_output(&self, bytes: &[u8]) -> String {
        if bytes.len() <= self.max_output_bytes {
            return String::from_utf8_lossy(bytes).into_owned();
        }
        let mut end = self.max_output_bytes;
        while end > 0 && (bytes[end] & 0xC0) == 0x80 {
            end -= 1;
        }
        format!(
            "{}...\n[Output truncated, {} bytes total]",
            String::from_utf8_lossy(&bytes[..end]),
            bytes.len()
        )
    }
}

#[async_trait]
impl ExecutionSink for ProcessExecutor {
    async fn execute(
        &self,
        command: &str,
        args: &[String],
        requires_shell: bool,
    ) -> ExecutionOutcome {
        let mut cmd = if requires_shell {
            let words = std::iter::once(command).chain(args.iter().map(String::as_str));
            let script = match shlex::try_join(words) {
                Ok(script) => script,
                Err(e) => {
                    return ExecutionOutcome::SpawnFailed {
                        error: format!("cannot quote command for shell: {e}"),
                    };
                }
            };
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(script);
            cmd
        } else {
            let mut cmd = Command::new(command);
            cmd.args(args);
            cmd
        };
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                log::warn!("failed to spawn {command}: {e}");
                return ExecutionOutcome::SpawnFailed {
                    error: e.to_string(),
                };
            }
        };

        // Dropping the wait future on timeout drops the child, which kills it.
        match timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => ExecutionOutcome::Completed {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: self.truncate_output(&output.stdout),
                stderr: self.truncate_output(&output.stderr),
            },
            Ok(Err(e)) => ExecutionOutcome::SpawnFailed {
                error: e.to_string(),
            },
            Err(_) => {
                log::warn!("{command} killed after {:?}", self.timeout);
                ExecutionOutcome::TimedOut {
                    after_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                }
            }
        }
    }
}
