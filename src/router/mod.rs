//! Command Router: triage a command into a route before anything runs.
//!
//! Evaluation order is fixed and first match wins:
//!
//! 1. shell builtin
//! 2. chain, pipe or command substitution
//! 3. always-dangerous command (or `command subcommand` pair)
//! 4. `sudo`
//! 5. safe command, subject to per-command exceptions
//! 6. unknown
//!
//! Only the safe route runs directly. Every other route requires approval
//! and threat analysis.

pub mod decision;
pub mod invocation;

pub use decision::{Route, RoutingDecision, RuleSource};
pub use invocation::{CommandInvocation, ExecutionContext};

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::commands::{CommandSpec, SpecVerdict, find::FindSpec, git::GitSpec};
use crate::config::{Config, UserRules};
use crate::parse;

/// Built-in entries plus a user layer that can be replaced on reload.
#[derive(Debug, Default)]
struct RuleSet {
    builtin: HashSet<String>,
    user: HashSet<String>,
}

impl RuleSet {
    fn from_list(list: &[String]) -> Self {
        Self {
            builtin: list.iter().map(|s| s.trim().to_string()).collect(),
            user: HashSet::new(),
        }
    }

    /// User entries report as user even when they shadow a built-in one.
    fn source(&self, key: &str) -> Option<RuleSource> {
        if self.user.contains(key) {
            Some(RuleSource::User)
        } else if self.builtin.contains(key) {
            Some(RuleSource::BuiltIn)
        } else {
            None
        }
    }

    fn len(&self) -> usize {
        self.builtin.union(&self.user).count()
    }
}

/// Set sizes, for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    pub safe: usize,
    pub dangerous: usize,
    pub builtin: usize,
    pub user_rules: usize,
}

pub struct Router {
    safe: RuleSet,
    dangerous: RuleSet,
    builtins: HashSet<String>,
    specs: HashMap<String, Box<dyn CommandSpec>>,
}

impl Router {
    /// Build the router from configuration, including its `[rules]`.
    pub fn from_config(config: &Config) -> Self {
        let mut specs: HashMap<String, Box<dyn CommandSpec>> = HashMap::new();
        specs.insert("find".into(), Box::new(FindSpec::from_config(&config.find)));
        specs.insert("git".into(), Box::new(GitSpec::from_config(&config.git)));

        let mut router = Self {
            safe: RuleSet::from_list(&config.commands.safe),
            dangerous: RuleSet::from_list(&config.commands.dangerous),
            builtins: config.commands.builtin.iter().cloned().collect(),
            specs,
        };
        router.reload(&config.rules);
        router
    }

    /// Route an invocation.
    pub fn route_invocation(&self, inv: &CommandInvocation) -> RoutingDecision {
        self.route(inv.command(), inv.args(), inv.context())
    }

    /// Route `(command, args)` issued in `ctx`.
    pub fn route(&self, command: &str, args: &[String], ctx: &ExecutionContext) -> RoutingDecision {
        let name = parse::base_command(command);
        let pair = args.first().map(|sub| format!("{name} {sub}"));

        if self.builtins.contains(&name) {
            return RoutingDecision::gated(
                Route::Builtin,
                format!("{name} is a shell builtin"),
                RuleSource::BuiltIn,
            );
        }

        let facts = parse::analyze(command, args);
        if facts.is_compound() || facts.has_substitution {
            let mut kinds = Vec::new();
            if facts.is_chain {
                kinds.push("chain");
            }
            if facts.is_pipe {
                kinds.push("pipe");
            }
            if facts.has_substitution {
                kinds.push("command substitution");
            }
            return RoutingDecision::gated(
                Route::Complex,
                format!("compound command ({})", kinds.join(", ")),
                RuleSource::BuiltIn,
            );
        }

        if let Some((key, source)) = self.dangerous_match(&name, pair.as_deref()) {
            return RoutingDecision::gated(
                Route::Dangerous,
                format!("{key} is always dangerous"),
                source,
            );
        }

        if name == "sudo" || ctx.sudo {
            return RoutingDecision::gated(
                Route::Sudo,
                "sudo commands always require approval".into(),
                RuleSource::BuiltIn,
            );
        }

        if let Some((key, source)) = self.safe_match(&name, pair.as_deref()) {
            if facts.has_redirection {
                return RoutingDecision::gated(
                    Route::Unknown,
                    format!("{key} with redirection"),
                    source,
                );
            }
            if let Some(spec) = self.specs.get(&name) {
                let inv = CommandInvocation::new(
                    name.as_str(),
                    args.iter().map(String::as_str),
                    ctx.clone(),
                );
                return match spec.evaluate(&inv) {
                    SpecVerdict::Safe(reason) => RoutingDecision::safe(reason, source),
                    SpecVerdict::Downgrade(reason) => {
                        RoutingDecision::gated(Route::Unknown, reason, source)
                    }
                };
            }
            return RoutingDecision::safe(format!("safe: {key}"), source);
        }

        let label = if name.is_empty() { "(empty)" } else { name.as_str() };
        RoutingDecision::gated(
            Route::Unknown,
            format!("unrecognized command: {label}"),
            RuleSource::BuiltIn,
        )
    }

    /// Pair first, then the name, then the dotted prefix (`mkfs.ext4` → `mkfs`).
    fn dangerous_match(&self, name: &str, pair: Option<&str>) -> Option<(String, RuleSource)> {
        if let Some(pair) = pair
            && let Some(source) = self.dangerous.source(pair)
        {
            return Some((pair.to_string(), source));
        }
        if let Some(source) = self.dangerous.source(name) {
            return Some((name.to_string(), source));
        }
        if let Some(prefix) = name.split('.').next()
            && prefix != name
            && !prefix.is_empty()
            && let Some(source) = self.dangerous.source(prefix)
        {
            return Some((prefix.to_string(), source));
        }
        None
    }

    fn safe_match(&self, name: &str, pair: Option<&str>) -> Option<(String, RuleSource)> {
        if let Some(pair) = pair
            && let Some(source) = self.safe.source(pair)
        {
            return Some((pair.to_string(), source));
        }
        if name.is_empty() {
            return None;
        }
        self.safe
            .source(name)
            .map(|source| (name.to_string(), source))
    }

    /// Add a command (or `command sub` pair) to the safe set for this process.
    pub fn add_safe_command(&mut self, command: &str) {
        log::info!("router: adding safe command {command:?}");
        self.safe.user.insert(command.trim().to_string());
    }

    /// Add a command (or pair) to the always-dangerous set for this process.
    pub fn add_dangerous_command(&mut self, command: &str) {
        log::info!("router: adding dangerous command {command:?}");
        self.dangerous.user.insert(command.trim().to_string());
    }

    /// Remove a command from the safe set. Returns whether it was present.
    pub fn remove_safe_command(&mut self, command: &str) -> bool {
        let key = command.trim();
        let builtin = self.safe.builtin.remove(key);
        let user = self.safe.user.remove(key);
        if builtin || user {
            log::info!("router: removed safe command {key:?}");
        }
        builtin || user
    }

    /// Replace previously loaded user rules. Built-in entries are kept.
    pub fn reload(&mut self, rules: &UserRules) {
        self.safe.user = rules.safe.iter().map(|s| s.trim().to_string()).collect();
        self.dangerous.user = rules
            .dangerous
            .iter()
            .map(|s| s.trim().to_string())
            .collect();
        log::debug!(
            "router: loaded {} safe and {} dangerous user rules",
            self.safe.user.len(),
            self.dangerous.user.len()
        );
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            safe: self.safe.len(),
            dangerous: self.dangerous.len(),
            builtin: self.builtins.len(),
            user_rules: self.safe.user.len() + self.dangerous.user.len(),
        }
    }
}
