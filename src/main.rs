//! agent-gate: PreToolUse hook that gates Bash commands.
//!
//! Reads the hook payload from stdin, classifies the command, writes one
//! audit entry and prints a permission decision to stdout. A warning this
//! session was already asked about prints nothing, leaving the host's own
//! permission flow in charge.
//!
//! Flags:
//!   --verbose              also log diagnostics to stderr
//!   --dump-config          print the merged configuration as TOML and exit
//!   --no-escalate-critical ask instead of deny for critical commands

use std::io::Read;

use chrono::Utc;
use serde::Deserialize;

use agent_gate::config::Config;
use agent_gate::gate::CommandGate;
use agent_gate::logging;
use agent_gate::router::{CommandInvocation, ExecutionContext};

#[derive(Deserialize)]
struct HookInput {
    tool_name: Option<String>,
    tool_input: Option<ToolInput>,
    session_id: Option<String>,
    cwd: Option<String>,
}

#[derive(Deserialize)]
struct ToolInput {
    command: Option<String>,
}

fn print_decision(permission: &str, reason: &str) {
    let output = serde_json::json!({
        "hookSpecificOutput": {
            "hookEventName": "PreToolUse",
            "permissionDecision": permission,
            "permissionDecisionReason": reason,
        }
    });
    println!("{output}");
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let verbose = args.iter().any(|a| a == "--verbose");
    let config = Config::load();

    if args.iter().any(|a| a == "--dump-config") {
        match toml::to_string_pretty(&config) {
            Ok(text) => print!("{text}"),
            Err(e) => {
                eprintln!("failed to serialize config: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    logging::init(&config.settings.log_level, verbose);

    let mut input = String::new();
    if std::io::stdin().read_to_string(&mut input).is_err() {
        eprintln!("failed to read stdin");
        std::process::exit(1);
    }

    let hook_input: HookInput = match serde_json::from_str(&input) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("JSON parse error: {e}");
            std::process::exit(1);
        }
    };

    if hook_input.tool_name.as_deref() != Some("Bash") {
        return;
    }

    let command = hook_input
        .tool_input
        .and_then(|t| t.command)
        .unwrap_or_default();

    if command.trim().is_empty() {
        return;
    }

    let mut gate = match CommandGate::from_config(&config) {
        Ok(gate) => gate,
        Err(e) => {
            log::error!("audit log unavailable: {e}");
            print_decision("ask", &format!("agent-gate could not open its audit log: {e}"));
            return;
        }
    };
    if args.iter().any(|a| a == "--no-escalate-critical") {
        gate.set_escalate_critical(false);
    }

    let mut ctx = ExecutionContext::agent();
    if let Some(session) = hook_input.session_id {
        ctx = ctx.with_session(session);
    }
    if let Some(cwd) = hook_input.cwd {
        ctx = ctx.with_cwd(cwd);
    }
    let inv = CommandInvocation::from_command_line(&command, ctx);
    let classification = gate.evaluate(&inv).await;

    logging::log_decision(&command, &classification);
    gate.record_classification(&inv, &classification);
    gate.sessions().sweep(Utc::now());
    if let Err(e) = gate.shutdown().await {
        log::error!("audit flush failed: {e}");
    }

    if classification.repeat_warning {
        log::debug!("already asked about this command in this session");
        return;
    }
    print_decision(classification.verdict.permission(), &classification.reason);
}
