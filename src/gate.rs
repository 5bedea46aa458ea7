//! The command gate: classify, score, tokenize, execute, log.
//!
//! [`CommandGate`] owns one instance of every component. Routing decides
//! whether a command may run directly; anything else is scored by the
//! threat engine and weighed against the session's history before a
//! verdict is reached. A command that would still be asked about is then
//! previewed for what it destroys, and those files are backed up. Every
//! outcome writes exactly one audit entry with the command and arguments
//! redacted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::audit::{AuditEvent, AuditLogger, EventType};
use crate::auth::TokenStore;
use crate::backup::BackupManager;
use crate::config::{Config, RuleStore};
use crate::consequence::{self, ConsequencePreview, Consequences};
use crate::error::{AuditError, ConfigError};
use crate::exec::{ExecutionOutcome, ExecutionSink, ProcessExecutor};
use crate::redact;
use crate::router::{CommandInvocation, Route, Router, RouterStats, RoutingDecision, RuleSource};
use crate::session::SessionStore;
use crate::threat::report::{BLOCK_BAND, WARN_BAND};
use crate::threat::workflow::SessionAssessment;
use crate::threat::{ThreatEngine, ThreatReport};
use crate::verdict::{RiskLevel, Verdict};

/// Files at risk named in a workflow-pattern reason.
const FILES_AT_RISK_LISTED: usize = 5;

/// The classification result handed to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub risk_level: RiskLevel,
    pub requires_approval: bool,
    pub is_sudo: bool,
    pub source: RuleSource,
    pub reason: String,
    pub verdict: Verdict,
    pub routing: RoutingDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threat: Option<ThreatReport>,
    /// What the command would destroy, per destructive segment.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub consequences: Vec<Consequences>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<PathBuf>,
    /// This session was already asked about this exact command line.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub repeat_warning: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GateOutcome {
    Executed {
        classification: Classification,
        result: ExecutionOutcome,
    },
    /// An agent may run the command by redeeming `code`.
    AwaitingApproval {
        classification: Classification,
        code: String,
    },
    /// A human has to approve before [`CommandGate::approve`] runs it.
    NeedsApproval { classification: Classification },
    Blocked { classification: Classification },
    /// A redemption that did not produce a command.
    Rejected { reason: String },
}

impl GateOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateOutcome::Executed { .. } => "executed",
            GateOutcome::AwaitingApproval { .. } => "awaiting_approval",
            GateOutcome::NeedsApproval { .. } => "needs_approval",
            GateOutcome::Blocked { .. } => "blocked",
            GateOutcome::Rejected { .. } => "rejected",
        }
    }

    pub fn classification(&self) -> Option<&Classification> {
        match self {
            GateOutcome::Executed { classification, .. }
            | GateOutcome::AwaitingApproval { classification, .. }
            | GateOutcome::NeedsApproval { classification }
            | GateOutcome::Blocked { classification } => Some(classification),
            GateOutcome::Rejected { .. } => None,
        }
    }
}

pub struct CommandGate {
    router: RwLock<Router>,
    threat: Arc<ThreatEngine>,
    tokens: Arc<TokenStore>,
    audit: Arc<AuditLogger>,
    executor: Arc<dyn ExecutionSink>,
    sessions: Arc<SessionStore>,
    preview: Option<ConsequencePreview>,
    backups: Option<BackupManager>,
    escalate_critical: bool,
    dedup_warnings: bool,
    sweep_interval: Duration,
}

impl CommandGate {
    /// Assemble every component from configuration.
    pub fn from_config(config: &Config) -> Result<Self, AuditError> {
        let audit = Arc::new(AuditLogger::open(config.audit.clone())?);
        Ok(Self::with_audit(config, audit))
    }

    /// Like [`from_config`](Self::from_config), with an already-open audit log.
    pub fn with_audit(config: &Config, audit: Arc<AuditLogger>) -> Self {
        let threat = ThreatEngine::from_config(&config.threat).with_audit(Arc::clone(&audit));
        Self {
            router: RwLock::new(Router::from_config(config)),
            threat: Arc::new(threat),
            tokens: Arc::new(TokenStore::new(config.auth.token_ttl())),
            audit,
            executor: Arc::new(ProcessExecutor::from_config(&config.exec)),
            sessions: Arc::new(SessionStore::from_config(&config.session)),
            preview: config
                .preview
                .enabled
                .then(|| ConsequencePreview::from_config(&config.preview)),
            backups: config
                .backup
                .enabled
                .then(|| BackupManager::from_config(&config.backup, &config.preview)),
            escalate_critical: config.settings.escalate_critical,
            dedup_warnings: config.session.dedup_warnings,
            sweep_interval: config.auth.sweep_interval(),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn ExecutionSink>) -> Self {
        self.executor = executor;
        self
    }

    pub fn set_escalate_critical(&mut self, escalate: bool) {
        self.escalate_critical = escalate;
    }

    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.audit
    }

    pub fn threat(&self) -> &Arc<ThreatEngine> {
        &self.threat
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Classify an invocation and record it in its session.
    pub fn classify(&self, inv: &CommandInvocation) -> Classification {
        self.assess(inv, true)
    }

    /// Classify, preview, back up, and note whether the session saw this warning.
    ///
    /// This is what a hook host asks before it runs a command itself.
    pub async fn evaluate(&self, inv: &CommandInvocation) -> Classification {
        let mut classification = self.classify(inv);
        self.inspect(inv, &mut classification).await;
        if self.dedup_warnings && classification.verdict == Verdict::Warn {
            let key = warning_key(&inv.line());
            let first = self
                .sessions
                .update(inv.context().session_id.as_deref(), |h| h.first_warning(&key));
            classification.repeat_warning = !first;
        }
        classification
    }

    /// Preview what a warned command destroys and back that up.
    async fn inspect(&self, inv: &CommandInvocation, c: &mut Classification) {
        if c.verdict != Verdict::Warn {
            return;
        }
        let Some(preview) = &self.preview else {
            return;
        };
        let found = preview.analyze(inv).await;
        if found.is_empty() {
            return;
        }
        for consequences in &found {
            c.reason = format!("{}; {}", c.reason, consequences.summary(preview.max_listed()));
        }
        if let Some(backups) = &self.backups {
            match backups.create(inv, &found).await {
                Ok(record) => {
                    c.reason = format!("{}; backup saved to {}", c.reason, record.path.display());
                    c.backup = Some(record.path);
                }
                Err(e) => log::warn!("backup before {} failed: {e}", inv.command()),
            }
        }
        c.consequences = found;
    }

    fn assess(&self, inv: &CommandInvocation, record: bool) -> Classification {
        let routing = self.router.read().route_invocation(inv);
        let is_sudo = routing.routed == Route::Sudo || inv.context().sudo;
        let mut reason = routing.reason.clone();

        if routing.direct {
            if record {
                self.record_session(inv, RiskLevel::Low);
            }
            return Classification {
                risk_level: RiskLevel::Low,
                requires_approval: false,
                is_sudo,
                source: routing.source,
                reason,
                verdict: Verdict::Allow,
                routing,
                threat: None,
                consequences: Vec::new(),
                backup: None,
                repeat_warning: false,
            };
        }

        let report = self.threat.analyze_command(inv.command(), inv.args());
        let mut risk = route_floor(routing.routed);
        if let Some(band) = score_band(report.risk_score, self.threat.critical_threshold()) {
            risk = risk.max(band);
        }
        if !report.is_clean() {
            let found: Vec<&str> = report.matches.iter().map(|m| m.description.as_str()).collect();
            reason = format!(
                "{reason}; threat score {:.2}: {}",
                report.risk_score,
                found.join(", ")
            );
        }

        if record {
            let (session, at_risk) = self.record_session(inv, risk);
            if session.cumulative_risk > risk {
                log::info!(
                    "session risk raises {} from {risk} to {}",
                    inv.command(),
                    session.cumulative_risk
                );
                risk = session.cumulative_risk;
            }
            for p in &session.patterns {
                reason = format!("{reason}; workflow pattern {}: {}", p.name, p.description);
            }
            if !session.patterns.is_empty() && !at_risk.is_empty() {
                let shown = at_risk.len().min(FILES_AT_RISK_LISTED);
                reason = format!("{reason}; files at risk: {}", at_risk[..shown].join(", "));
                if at_risk.len() > shown {
                    reason = format!("{reason} (+{} more)", at_risk.len() - shown);
                }
            }
        }

        let verdict = if risk == RiskLevel::Critical && self.escalate_critical {
            Verdict::Block
        } else {
            Verdict::Warn
        };

        Classification {
            risk_level: risk,
            requires_approval: routing.requires_approval,
            is_sudo,
            source: routing.source,
            reason,
            verdict,
            routing,
            threat: Some(report),
            consequences: Vec::new(),
            backup: None,
            repeat_warning: false,
        }
    }

    /// Record into the invocation's session; returns its view and the files at risk.
    fn record_session(
        &self,
        inv: &CommandInvocation,
        risk: RiskLevel,
    ) -> (SessionAssessment, Vec<String>) {
        let paths = if risk > RiskLevel::Low {
            consequence::affected_paths(inv)
        } else {
            Vec::new()
        };
        self.sessions
            .update(inv.context().session_id.as_deref(), |history| {
                history.track_paths(paths);
                let assessment = history.record(&inv.line(), risk);
                (assessment, history.files_at_risk().to_vec())
            })
    }

    /// Run the full pipeline for one invocation.
    ///
    /// Direct routes execute. Approval-requiring ones give an agent a token
    /// and a human a [`GateOutcome::NeedsApproval`]. Blocked ones never run.
    pub async fn submit(&self, inv: CommandInvocation) -> GateOutcome {
        let mut classification = self.classify(&inv);
        self.inspect(&inv, &mut classification).await;
        let outcome = match classification.verdict {
            Verdict::Block => GateOutcome::Blocked { classification },
            Verdict::Allow => {
                let result = self
                    .executor
                    .execute(
                        inv.command(),
                        inv.args(),
                        classification.routing.requires_shell,
                    )
                    .await;
                GateOutcome::Executed {
                    classification,
                    result,
                }
            }
            Verdict::Warn if inv.context().agent => {
                let analysis = serde_json::to_value(&classification).unwrap_or_default();
                let code = self.tokens.issue(inv.clone(), analysis);
                GateOutcome::AwaitingApproval {
                    classification,
                    code,
                }
            }
            Verdict::Warn => GateOutcome::NeedsApproval { classification },
        };
        self.record_outcome(&inv, &outcome);
        outcome
    }

    /// Execute after a human approved out of band. Blocked commands stay blocked.
    pub async fn approve(&self, inv: CommandInvocation) -> GateOutcome {
        let classification = self.assess(&inv, false);
        let outcome = if classification.verdict == Verdict::Block {
            GateOutcome::Blocked { classification }
        } else {
            let result = self
                .executor
                .execute(
                    inv.command(),
                    inv.args(),
                    classification.routing.requires_shell,
                )
                .await;
            GateOutcome::Executed {
                classification,
                result,
            }
        };
        self.record_outcome(&inv, &outcome);
        outcome
    }

    /// Redeem an agent's code and run the exact tuple frozen at issuance.
    pub async fn redeem(&self, code: &str) -> GateOutcome {
        let redemption = self.tokens.redeem(code);
        let Some(data) = redemption.data.filter(|_| redemption.valid) else {
            let reason = redemption
                .reason
                .unwrap_or_else(|| crate::auth::INVALID_REASON.to_string());
            log::info!("auth code {code} rejected: {reason}");
            let event = AuditEvent::new(EventType::CommandExecution)
                .verdict(Verdict::Block)
                .metadata(json!({ "outcome": "rejected", "reason": reason }));
            self.write_audit(event);
            return GateOutcome::Rejected { reason };
        };

        let inv = data.invocation;
        let routing = self.router.read().route_invocation(&inv);
        let classification = Classification {
            risk_level: data
                .analysis
                .get("riskLevel")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_else(|| route_floor(routing.routed)),
            requires_approval: routing.requires_approval,
            is_sudo: routing.routed == Route::Sudo || inv.context().sudo,
            source: routing.source,
            reason: format!("approved by auth code: {}", routing.reason),
            verdict: Verdict::Allow,
            threat: None,
            routing,
            consequences: Vec::new(),
            backup: None,
            repeat_warning: false,
        };
        let result = self
            .executor
            .execute(
                inv.command(),
                inv.args(),
                classification.routing.requires_shell,
            )
            .await;
        let outcome = GateOutcome::Executed {
            classification,
            result,
        };
        self.record_outcome(&inv, &outcome);
        outcome
    }

    /// Audit a classification the host acts on itself, as the hook does.
    pub fn record_classification(&self, inv: &CommandInvocation, classification: &Classification) {
        let outcome = if classification.repeat_warning {
            "repeat_warning"
        } else {
            "classified"
        };
        self.audit_decision(inv, classification, outcome, None);
    }

    fn record_outcome(&self, inv: &CommandInvocation, outcome: &GateOutcome) {
        let Some(c) = outcome.classification() else {
            return;
        };
        let execution = match outcome {
            GateOutcome::Executed { result, .. } => Some(result),
            _ => None,
        };
        self.audit_decision(inv, c, outcome.as_str(), execution);
    }

    fn audit_decision(
        &self,
        inv: &CommandInvocation,
        c: &Classification,
        outcome: &str,
        execution: Option<&ExecutionOutcome>,
    ) {
        let event_type = if c.verdict == Verdict::Block {
            EventType::SecurityViolation
        } else {
            EventType::CommandExecution
        };
        let mut metadata = json!({
            "outcome": outcome,
            "route": c.routing.routed,
            "source": c.source,
            "reason": redact::redact_str(&c.reason),
            "agent": inv.context().agent,
            "sudo": c.is_sudo,
        });
        if let Some(report) = &c.threat {
            metadata["riskScore"] = json!(report.risk_score);
        }
        if let Some(session) = &inv.context().session_id {
            metadata["sessionId"] = json!(session);
        }
        if let Some(backup) = &c.backup {
            metadata["backup"] = json!(backup);
        }
        if let Some(result) = execution {
            metadata["execution"] = match result {
                ExecutionOutcome::Completed { exit_code, .. } => json!({ "exitCode": exit_code }),
                ExecutionOutcome::SpawnFailed { error } => json!({ "spawnError": error }),
                ExecutionOutcome::TimedOut { after_ms } => json!({ "timedOutAfterMs": after_ms }),
            };
        }

        let event = AuditEvent::new(event_type)
            .command(redact::redact_str(inv.command()))
            .args(redact::redact_args(inv.args()))
            .verdict(c.verdict)
            .risk_level(c.risk_level)
            .metadata(metadata);
        self.write_audit(event);
    }

    fn write_audit(&self, event: AuditEvent) {
        if let Err(e) = self.audit.log(event) {
            log::error!("failed to write audit entry: {e}");
        }
    }

    // ── Rule management ──

    pub fn add_safe_command(&self, command: &str) {
        self.router.write().add_safe_command(command);
        self.log_rule_change("add_safe", command);
    }

    pub fn add_dangerous_command(&self, command: &str) {
        self.router.write().add_dangerous_command(command);
        self.log_rule_change("add_dangerous", command);
    }

    pub fn remove_safe_command(&self, command: &str) -> bool {
        let removed = self.router.write().remove_safe_command(command);
        if removed {
            self.log_rule_change("remove_safe", command);
        }
        removed
    }

    /// Replace the router's user rules with what `store` holds now.
    pub fn reload_rules(&self, store: &dyn RuleStore) -> Result<RouterStats, ConfigError> {
        let rules = store.load_rules()?;
        let stats = {
            let mut router = self.router.write();
            router.reload(&rules);
            router.stats()
        };
        log::info!(
            "reloaded {} safe and {} dangerous user rules",
            rules.safe.len(),
            rules.dangerous.len()
        );
        let event = AuditEvent::new(EventType::ConfigurationChange).metadata(json!({
            "action": "reload_rules",
            "safe": rules.safe,
            "dangerous": rules.dangerous,
        }));
        self.write_audit(event);
        Ok(stats)
    }

    pub fn router_stats(&self) -> RouterStats {
        self.router.read().stats()
    }

    fn log_rule_change(&self, action: &str, command: &str) {
        let event = AuditEvent::new(EventType::ConfigurationChange)
            .metadata(json!({ "action": action, "command": command }));
        self.write_audit(event);
    }

    // ── Background work ──

    /// Start the token sweep, threat cache purge, session sweep and audit flusher.
    pub fn spawn_maintenance(self: &Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let tokens = Arc::clone(&self.tokens);
        let sweep = crate::scheduler::spawn_periodic(
            "token-sweep",
            self.sweep_interval,
            cancel.clone(),
            move || {
                let tokens = Arc::clone(&tokens);
                async move {
                    tokens.cleanup();
                }
            },
        );
        let threat = Arc::clone(&self.threat);
        let purge = crate::scheduler::spawn_periodic(
            "threat-cache-purge",
            self.sweep_interval,
            cancel.clone(),
            move || {
                let threat = Arc::clone(&threat);
                async move {
                    threat.purge_expired();
                }
            },
        );
        let sessions = Arc::clone(&self.sessions);
        let expire = crate::scheduler::spawn_periodic(
            "session-sweep",
            self.sweep_interval,
            cancel.clone(),
            move || {
                let sessions = Arc::clone(&sessions);
                async move {
                    sessions.sweep(Utc::now());
                }
            },
        );
        let flush = self.audit.spawn_flusher(cancel);
        vec![sweep, purge, expire, flush]
    }

    /// Flush the audit queue and wait for pending alerts.
    pub async fn shutdown(&self) -> Result<(), AuditError> {
        self.audit.shutdown().await
    }
}

/// Dedup key for a warned command line.
fn warning_key(line: &str) -> String {
    let digest = hex::encode(Sha256::digest(line.as_bytes()));
    format!("cmd-{}", &digest[..12])
}

/// The least risk a route carries before any indicator fires.
fn route_floor(route: Route) -> RiskLevel {
    match route {
        Route::Safe => RiskLevel::Low,
        Route::Dangerous | Route::Sudo => RiskLevel::High,
        Route::Builtin | Route::Complex | Route::Unknown => RiskLevel::Medium,
    }
}

/// Risk implied by a threat score alone, if it reaches a band.
fn score_band(score: f64, critical_threshold: f64) -> Option<RiskLevel> {
    if score >= critical_threshold {
        Some(RiskLevel::Critical)
    } else if score > BLOCK_BAND {
        Some(RiskLevel::High)
    } else if score >= WARN_BAND {
        Some(RiskLevel::Medium)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditEntry;
    use crate::config::{AuditConfig, BackupConfig, RuleFile, SessionConfig};
    use crate::router::ExecutionContext;
    use async_trait::async_trait;
    use chrono::TimeDelta;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeExecutor {
        calls: Mutex<Vec<(String, Vec<String>, bool)>>,
    }

    #[async_trait]
    impl ExecutionSink for FakeExecutor {
        async fn execute(
            &self,
            command: &str,
            args: &[String],
            requires_shell: bool,
        ) -> ExecutionOutcome {
            self.calls
                .lock()
                .push((command.to_string(), args.to_vec(), requires_shell));
            ExecutionOutcome::Completed {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            }
        }
    }

    fn test_config(dir: &TempDir) -> Config {
        let mut config = Config::default_config();
        config.audit = AuditConfig {
            kdf_iterations: 10,
            console_alerts: false,
            ..AuditConfig::in_dir(dir.path())
        };
        config.session = SessionConfig::in_dir(dir.path().join("sessions"));
        config.backup = BackupConfig::in_dir(dir.path().join("backups"));
        config
    }

    fn gate(dir: &TempDir) -> (CommandGate, Arc<FakeExecutor>) {
        let config = test_config(dir);
        let exec = Arc::new(FakeExecutor::default());
        let gate = CommandGate::from_config(&config)
            .unwrap()
            .with_executor(Arc::clone(&exec) as Arc<dyn ExecutionSink>);
        (gate, exec)
    }

    fn agent(line: &str) -> CommandInvocation {
        CommandInvocation::from_command_line(line, ExecutionContext::agent())
    }

    fn human(line: &str) -> CommandInvocation {
        CommandInvocation::from_command_line(line, ExecutionContext::human())
    }

    fn written_entries(gate: &CommandGate) -> Vec<AuditEntry> {
        gate.audit().flush().unwrap();
        std::fs::read_to_string(gate.audit().log_path())
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn safe_command_runs_directly() {
        let dir = TempDir::new().unwrap();
        let (gate, exec) = gate(&dir);
        let outcome = gate.submit(agent("ls -la")).await;
        let c = outcome.classification().unwrap();
        assert_eq!(outcome.as_str(), "executed");
        assert_eq!(c.verdict, Verdict::Allow);
        assert_eq!(c.risk_level, RiskLevel::Low);
        assert!(c.threat.is_none());
        assert_eq!(
            exec.calls.lock().as_slice(),
            [("ls".to_string(), vec!["-la".to_string()], false)]
        );
    }

    #[tokio::test]
    async fn dangerous_command_gets_token_for_agent() {
        let dir = TempDir::new().unwrap();
        let (gate, exec) = gate(&dir);
        let outcome = gate.submit(agent("rm -rf build")).await;
        let GateOutcome::AwaitingApproval {
            classification,
            code,
        } = outcome
        else {
            panic!("expected a token, got {outcome:?}");
        };
        assert_eq!(classification.verdict, Verdict::Warn);
        assert_eq!(classification.risk_level, RiskLevel::High);
        assert!(classification.requires_approval);
        assert!(exec.calls.lock().is_empty());

        let redeemed = gate.redeem(&code).await;
        assert_eq!(redeemed.as_str(), "executed");
        assert_eq!(
            exec.calls.lock().as_slice(),
            [(
                "rm".to_string(),
                vec!["-rf".to_string(), "build".to_string()],
                false
            )]
        );

        match gate.redeem(&code).await {
            GateOutcome::Rejected { reason } => assert!(reason.contains("already used")),
            other => panic!("expected rejection, got {other:?}"),
        }
        assert_eq!(exec.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn human_needs_approval_then_runs() {
        let dir = TempDir::new().unwrap();
        let (gate, exec) = gate(&dir);
        let outcome = gate.submit(human("rm notes.txt")).await;
        assert_eq!(outcome.as_str(), "needs_approval");
        assert!(exec.calls.lock().is_empty());

        let approved = gate.approve(human("rm notes.txt")).await;
        assert_eq!(approved.as_str(), "executed");
        assert_eq!(exec.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn critical_score_blocks() {
        let dir = TempDir::new().unwrap();
        let (gate, exec) = gate(&dir);
        let outcome = gate.submit(agent("dd if=/dev/random of=/dev/sda")).await;
        let c = outcome.classification().unwrap();
        assert_eq!(outcome.as_str(), "blocked");
        assert_eq!(c.risk_level, RiskLevel::Critical);
        assert!(c.reason.contains("raw write to a block device"));
        assert!(exec.calls.lock().is_empty());

        let approved = gate.approve(human("dd if=/dev/random of=/dev/sda")).await;
        assert_eq!(approved.as_str(), "blocked");
        assert!(exec.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn critical_warns_without_escalation() {
        let dir = TempDir::new().unwrap();
        let (mut gate, _exec) = gate(&dir);
        gate.set_escalate_critical(false);
        let c = gate.classify(&agent("dd if=/dev/random of=/dev/sda"));
        assert_eq!(c.risk_level, RiskLevel::Critical);
        assert_eq!(c.verdict, Verdict::Warn);
    }

    #[tokio::test]
    async fn builtin_redeems_into_shell() {
        let dir = TempDir::new().unwrap();
        let (gate, exec) = gate(&dir);
        let GateOutcome::AwaitingApproval { code, .. } = gate.submit(agent("cd /srv")).await
        else {
            panic!("builtin should need approval");
        };
        gate.redeem(&code).await;
        assert_eq!(
            exec.calls.lock().as_slice(),
            [("cd".to_string(), vec!["/srv".to_string()], true)]
        );
    }

    #[tokio::test]
    async fn unknown_code_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (gate, exec) = gate(&dir);
        match gate.redeem("swift-eagle-42").await {
            GateOutcome::Rejected { reason } => assert_eq!(reason, crate::auth::INVALID_REASON),
            other => panic!("unexpected {other:?}"),
        }
        assert!(exec.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn session_pattern_escalates_to_block() {
        let dir = TempDir::new().unwrap();
        let (gate, _exec) = gate(&dir);
        let ctx = ExecutionContext::agent().with_session("s1");
        let first = gate.classify(&CommandInvocation::from_command_line(
            "git reset --hard HEAD~3",
            ctx.clone(),
        ));
        assert_eq!(first.verdict, Verdict::Warn);

        let second = gate.classify(&CommandInvocation::from_command_line(
            "git push --force origin main",
            ctx,
        ));
        assert_eq!(second.risk_level, RiskLevel::Critical);
        assert_eq!(second.verdict, Verdict::Block);
        assert!(second.reason.contains("HISTORY_REWRITE"));
    }

    #[tokio::test]
    async fn session_history_outlives_the_gate() {
        let shared = TempDir::new().unwrap();
        let ctx = ExecutionContext::agent().with_session("s1");
        for (line, expected) in [
            ("git reset --hard HEAD~3", Verdict::Warn),
            ("git push --force origin main", Verdict::Block),
        ] {
            // A fresh gate per command, as each hook call is a fresh process.
            let dir = TempDir::new().unwrap();
            let mut config = test_config(&dir);
            config.session = SessionConfig::in_dir(shared.path());
            let gate = CommandGate::from_config(&config).unwrap();
            let c = gate.classify(&CommandInvocation::from_command_line(line, ctx.clone()));
            assert_eq!(c.verdict, expected, "{line}: {}", c.reason);
        }
    }

    #[tokio::test]
    async fn workflow_reason_names_files_at_risk() {
        let dir = TempDir::new().unwrap();
        let (gate, _exec) = gate(&dir);
        let ctx = ExecutionContext::agent().with_session("s1");
        gate.classify(&CommandInvocation::from_command_line("git rm -r src docs", ctx.clone()));
        gate.classify(&CommandInvocation::from_command_line("git commit -m wipe", ctx.clone()));
        let c = gate.classify(&CommandInvocation::from_command_line("git push --force", ctx));
        assert!(c.reason.contains("REPO_WIPE"), "{}", c.reason);
        assert!(c.reason.contains("files at risk: src, docs"), "{}", c.reason);
    }

    #[tokio::test]
    async fn sweep_clears_anonymous_escalation() {
        let dir = TempDir::new().unwrap();
        let (mut gate, _exec) = gate(&dir);
        gate.set_escalate_critical(false);
        gate.classify(&agent("dd if=/dev/random of=/dev/sda"));
        for line in ["ls -la", "cat Cargo.toml", "pwd"] {
            gate.classify(&agent(line));
        }
        assert_eq!(gate.classify(&agent("rm notes.txt")).risk_level, RiskLevel::Critical);

        gate.sessions().sweep(Utc::now());
        assert_eq!(gate.classify(&agent("rm notes.txt")).risk_level, RiskLevel::High);
    }

    #[tokio::test]
    async fn sweep_evicts_idle_sessions() {
        let dir = TempDir::new().unwrap();
        let (gate, _exec) = gate(&dir);
        gate.classify(&CommandInvocation::from_command_line(
            "ls",
            ExecutionContext::agent().with_session("idle"),
        ));
        assert_eq!(gate.sessions().len(), 1);
        gate.sessions().sweep(Utc::now() + TimeDelta::days(8));
        assert!(gate.sessions().is_empty());
    }

    #[tokio::test]
    async fn warned_delete_is_previewed_and_backed_up() {
        let dir = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        std::fs::create_dir_all(work.path().join("src")).unwrap();
        std::fs::write(work.path().join("src/main.rs"), "fn main() {}\n").unwrap();
        let (gate, _exec) = gate(&dir);

        let inv = CommandInvocation::from_command_line(
            "rm -rf src",
            ExecutionContext::human().with_cwd(work.path()),
        );
        let c = gate.evaluate(&inv).await;
        assert_eq!(c.verdict, Verdict::Warn);
        assert!(c.reason.contains("will delete 1 file, 1 directory"), "{}", c.reason);
        assert!(c.reason.contains("src/main.rs"), "{}", c.reason);
        assert_eq!(c.consequences.len(), 1);

        let backup = c.backup.clone().expect("backup path");
        assert!(backup.starts_with(dir.path().join("backups")));
        assert!(backup.join("files/src/main.rs").is_file());
        assert!(c.reason.contains("backup saved to"));
        assert!(!c.repeat_warning);

        gate.record_classification(&inv, &c);
        let entries = written_entries(&gate);
        let metadata = entries[0].metadata.as_ref().unwrap();
        assert_eq!(metadata["backup"], json!(backup));
    }

    #[tokio::test]
    async fn nothing_to_lose_skips_the_backup() {
        let dir = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let (gate, _exec) = gate(&dir);
        let inv = CommandInvocation::from_command_line(
            "rm -rf missing",
            ExecutionContext::human().with_cwd(work.path()),
        );
        let c = gate.evaluate(&inv).await;
        assert_eq!(c.verdict, Verdict::Warn);
        assert!(c.consequences.is_empty());
        assert!(c.backup.is_none());
        assert!(!dir.path().join("backups").exists());
    }

    #[tokio::test]
    async fn repeated_warning_is_flagged_once_per_session() {
        let dir = TempDir::new().unwrap();
        let (gate, _exec) = gate(&dir);
        let in_session = |id: &str| {
            CommandInvocation::from_command_line("rm notes.txt", ExecutionContext::human().with_session(id))
        };

        assert!(!gate.evaluate(&in_session("s1")).await.repeat_warning);
        let again = gate.evaluate(&in_session("s1")).await;
        assert!(again.repeat_warning);
        assert!(!gate.evaluate(&in_session("s2")).await.repeat_warning);

        gate.record_classification(&in_session("s1"), &again);
        let entries = written_entries(&gate);
        assert_eq!(entries[0].metadata.as_ref().unwrap()["outcome"], "repeat_warning");
    }

    #[tokio::test]
    async fn allowed_commands_are_never_deduplicated() {
        let dir = TempDir::new().unwrap();
        let (gate, _exec) = gate(&dir);
        for _ in 0..2 {
            let c = gate.evaluate(&agent("ls")).await;
            assert_eq!(c.verdict, Verdict::Allow);
            assert!(!c.repeat_warning);
        }
    }

    #[tokio::test]
    async fn sessions_are_independent() {
        let dir = TempDir::new().unwrap();
        let (gate, _exec) = gate(&dir);
        gate.classify(&CommandInvocation::from_command_line(
            "git reset --hard",
            ExecutionContext::agent().with_session("a"),
        ));
        let other = gate.classify(&CommandInvocation::from_command_line(
            "git push --force",
            ExecutionContext::agent().with_session("b"),
        ));
        assert_ne!(other.verdict, Verdict::Block);
    }

    #[tokio::test]
    async fn audit_entry_is_redacted() {
        let dir = TempDir::new().unwrap();
        let (gate, _exec) = gate(&dir);
        gate.submit(human("curl -H 'Authorization: Bearer abcdef123456' https://api.example.com"))
            .await;

        let entries = written_entries(&gate);
        assert_eq!(entries.len(), 1);
        let (command, args) = gate.audit().decrypt_entry(&entries[0]);
        assert_eq!(command.as_deref(), Some("curl"));
        let args = args.unwrap();
        assert!(args.iter().any(|a| a.contains("[REDACTED_BEARER_TOKEN]")));
        assert!(!args.iter().any(|a| a.contains("abcdef123456")));
        let metadata = entries[0].metadata.as_ref().unwrap();
        assert_eq!(metadata["outcome"], "needs_approval");
    }

    #[tokio::test]
    async fn every_outcome_is_audited() {
        let dir = TempDir::new().unwrap();
        let (gate, _exec) = gate(&dir);
        gate.submit(agent("ls")).await;
        gate.submit(human("rm x")).await;
        gate.redeem("nope").await;

        let outcomes: Vec<String> = written_entries(&gate)
            .iter()
            .filter_map(|e| e.metadata.as_ref())
            .map(|m| m["outcome"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(outcomes, ["executed", "needs_approval", "rejected"]);
    }

    #[tokio::test]
    async fn rule_changes_take_effect() {
        let dir = TempDir::new().unwrap();
        let (gate, _exec) = gate(&dir);
        assert_eq!(gate.classify(&agent("make build")).routing.routed, Route::Unknown);

        gate.add_safe_command("make");
        let c = gate.classify(&agent("make build"));
        assert_eq!(c.routing.routed, Route::Safe);
        assert_eq!(c.source, RuleSource::User);

        gate.add_dangerous_command("make");
        assert_eq!(gate.classify(&agent("make build")).routing.routed, Route::Dangerous);
        assert!(gate.remove_safe_command("make"));
    }

    #[tokio::test]
    async fn reload_from_rule_file() {
        let dir = TempDir::new().unwrap();
        let (gate, _exec) = gate(&dir);
        let path = dir.path().join("rules.toml");
        std::fs::write(&path, "[rules]\nsafe = [\"just\"]\n").unwrap();

        let stats = gate.reload_rules(&RuleFile::new(&path)).unwrap();
        assert_eq!(stats.user_rules, 1);
        assert_eq!(gate.classify(&agent("just test")).routing.routed, Route::Safe);

        std::fs::write(&path, "[rules]\nsafe = []\n").unwrap();
        gate.reload_rules(&RuleFile::new(&path)).unwrap();
        assert_eq!(gate.classify(&agent("just test")).routing.routed, Route::Unknown);
    }

    #[test]
    fn score_bands() {
        assert_eq!(score_band(0.95, 0.9), Some(RiskLevel::Critical));
        assert_eq!(score_band(0.75, 0.9), Some(RiskLevel::High));
        assert_eq!(score_band(0.7, 0.9), Some(RiskLevel::Medium));
        assert_eq!(score_band(0.39, 0.9), None);
    }

    #[tokio::test(start_paused = true)]
    async fn maintenance_stops_on_cancel() {
        let dir = TempDir::new().unwrap();
        let (gate, _exec) = gate(&dir);
        let gate = Arc::new(gate);
        let cancel = CancellationToken::new();
        let handles = gate.spawn_maintenance(cancel.clone());
        assert_eq!(handles.len(), 4);
        cancel.cancel();
        for h in handles {
            h.await.unwrap();
        }
    }
}
