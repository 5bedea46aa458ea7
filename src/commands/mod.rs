//! Per-command exceptions to the safe set.
//!
//! A command in the safe set may still be unsafe for some arguments:
//! `find -exec` runs arbitrary programs and most `git` subcommands write.
//! Each such command has a `CommandSpec` that can veto the safe route.

/// `find` is safe unless it executes other commands.
pub mod find;
/// `git` is safe only for read-only subcommands.
pub mod git;

use crate::router::CommandInvocation;

/// Outcome of a per-command check on a safe-listed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecVerdict {
    /// The arguments keep the command safe.
    Safe(String),
    /// The arguments take the command out of the safe set.
    Downgrade(String),
}

/// Trait for per-command safe-set exceptions.
pub trait CommandSpec: Send + Sync {
    /// Inspect the invocation's arguments.
    fn evaluate(&self, invocation: &CommandInvocation) -> SpecVerdict;
}
