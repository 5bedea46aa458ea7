//! agent-gate: decide whether a shell command may run, and keep a record.
//!
//! Commands issued by a human or an AI coding agent pass through one
//! pipeline: the [`router`] triages them, the [`threat`] engine scores
//! anything that is not plainly safe, [`auth`] issues single-use codes for
//! approved agent commands, [`exec`] runs what was approved, and [`audit`]
//! writes every decision to an encrypted, integrity-hashed log.
//! [`gate::CommandGate`] ties these together.
//!
//! # Architecture
//!
//! - **[`parse`]**: Shell facts and tokenizing: chains, pipes, redirections, substitutions.
//! - **[`router`]**: Routing: builtin, complex, dangerous, sudo, safe, unknown.
//! - **[`commands`]**: Per-command exceptions to the safe set (`find`, `git`).
//! - **[`threat`]**: Indicator registry, scoring with a TTL cache, session workflow patterns.
//! - **[`session`]**: Session histories persisted across hook processes, with idle expiry.
//! - **[`consequence`]**: What a destructive command would remove, read before it runs.
//! - **[`backup`]**: Copies of those files and the git state, pruned to a limit.
//! - **[`auth`]**: Human-readable single-use authorization codes.
//! - **[`audit`]**: Encrypted audit log with rotation, verification and search.
//! - **[`config`]**: Configuration loading: embedded defaults + user overlay merge.
//! - **[`logging`]**: Process diagnostics and the decision log under `~/.local/share/agent-gate/`.

/// Authorization codes for pre-approved agent commands.
pub mod auth;
/// Secure audit logger.
pub mod audit;
/// Pre-destruction backups.
pub mod backup;
/// Per-command exceptions to the safe set.
pub mod commands;
/// Configuration types, loading, and overlay merge logic.
pub mod config;
/// Consequence previews for destructive commands.
pub mod consequence;
/// Error types.
pub mod error;
/// Process execution with a hard timeout.
pub mod exec;
/// The classify, score, tokenize, execute, log pipeline.
pub mod gate;
/// File-based diagnostics and decision logging.
pub mod logging;
/// Out-of-band alert delivery.
pub mod notify;
/// Shell command analysis: operators, redirections, tokenizing.
pub mod parse;
/// Credential redaction.
pub mod redact;
/// Command routing.
pub mod router;
/// Periodic background tasks.
pub mod scheduler;
/// Per-session history store.
pub mod session;
/// Threat intelligence engine.
pub mod threat;
/// Risk levels and verdicts.
pub mod verdict;

use router::{CommandInvocation, ExecutionContext, RoutingDecision};

/// Route a raw command line with the default configuration, as an agent.
///
/// This is the main entry point for tests and simple usage.
/// For user rules or the full pipeline, build a [`gate::CommandGate`].
pub fn route(command_line: &str) -> RoutingDecision {
    let config = config::Config::default_config();
    let router = router::Router::from_config(&config);
    let inv = CommandInvocation::from_command_line(command_line, ExecutionContext::agent());
    router.route_invocation(&inv)
}
