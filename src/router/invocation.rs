use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::parse;

/// Who is asking and from where.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    /// The command runs under `sudo`, explicitly or via the caller.
    pub sudo: bool,
    /// Issued by an autonomous agent rather than a human at a terminal.
    pub agent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    /// Groups commands for workflow-pattern tracking.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl ExecutionContext {
    pub fn agent() -> Self {
        Self {
            agent: true,
            ..Self::default()
        }
    }

    pub fn human() -> Self {
        Self::default()
    }

    pub fn with_session(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

/// A command, its arguments, and the context it was issued in.
///
/// Immutable once built; the gate freezes the exact tuple into auth tokens
/// so that redemption never re-parses a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandInvocation {
    command: String,
    args: Vec<String>,
    context: ExecutionContext,
}

impl CommandInvocation {
    pub fn new(
        command: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
        context: ExecutionContext,
    ) -> Self {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            context,
        }
    }

    /// Build from a raw command line, as a host hook delivers it.
    ///
    /// Operators become standalone arguments and leading `KEY=value`
    /// assignments are dropped. A leading `sudo` marks the context.
    pub fn from_command_line(raw: &str, mut context: ExecutionContext) -> Self {
        let mut words = parse::command_words(raw).into_iter();
        let command = words.next().unwrap_or_default();
        if command == "sudo" {
            context.sudo = true;
        }
        Self {
            command,
            args: words.collect(),
            context,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// The command's basename: `/usr/bin/git` routes as `git`.
    pub fn base_name(&self) -> String {
        parse::base_command(&self.command)
    }

    /// The command joined with its arguments.
    pub fn line(&self) -> String {
        parse::command_line(&self.command, &self.args)
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.args.iter().any(|a| a == flag)
    }

    /// First argument that is not a flag, e.g. the git subcommand.
    pub fn subcommand(&self) -> Option<&str> {
        self.args
            .iter()
            .map(String::as_str)
            .find(|a| !a.starts_with('-'))
    }
}
