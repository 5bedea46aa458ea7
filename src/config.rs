use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::threat::IndicatorInput;

/// Embedded default configuration.
const DEFAULT_CONFIG: &str = include_str!("../config.default.toml");

/// Location of the user overlay, relative to `$HOME`.
const USER_CONFIG_PATH: &str = ".config/agent-gate/config.toml";

// ── Final (merged) config types ──

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub commands: Commands,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub find: FindConfig,
    #[serde(default)]
    pub rules: UserRules,
    #[serde(default)]
    pub threat: ThreatConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub exec: ExecConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub preview: PreviewConfig,
    #[serde(default)]
    pub backup: BackupConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_true")]
    pub escalate_critical: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            escalate_critical: true,
        }
    }
}

/// Built-in command lists. Entries are a command name or a `command sub` pair.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Commands {
    #[serde(default)]
    pub safe: Vec<String>,
    #[serde(default)]
    pub dangerous: Vec<String>,
    #[serde(default)]
    pub builtin: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct GitConfig {
    #[serde(default)]
    pub read_only: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct FindConfig {
    #[serde(default)]
    pub exec_flags: Vec<String>,
}

/// User-defined routing rules, reported with a `user` source.
///
/// Kept apart from [`Commands`] so that classifications can tell a
/// built-in rule from a user override.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct UserRules {
    #[serde(default)]
    pub safe: Vec<String>,
    #[serde(default)]
    pub dangerous: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ThreatConfig {
    #[serde(default = "default_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_critical_threshold")]
    pub critical_threshold: f64,
    #[serde(default)]
    pub indicators: Vec<IndicatorInput>,
}

impl Default for ThreatConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_ttl_secs(),
            critical_threshold: default_critical_threshold(),
            indicators: Vec::new(),
        }
    }
}

impl ThreatConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default = "default_ttl_secs")]
    pub token_ttl_secs: u64,
    #[serde(default = "default_sweep_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_secs(),
        }
    }
}

impl AuthConfig {
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuditConfig {
    /// Directory holding the active log and its archives. `~` is expanded.
    #[serde(default = "default_audit_dir")]
    pub dir: String,
    #[serde(default = "default_audit_file")]
    pub file_name: String,
    #[serde(default = "default_flush_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_max_archives")]
    pub max_archives: usize,
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_true")]
    pub console_alerts: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            dir: default_audit_dir(),
            file_name: default_audit_file(),
            flush_interval_ms: default_flush_ms(),
            max_file_bytes: default_max_file_bytes(),
            max_archives: default_max_archives(),
            kdf_iterations: default_kdf_iterations(),
            webhook_url: None,
            console_alerts: true,
        }
    }
}

impl AuditConfig {
    /// Config rooted at an explicit directory, e.g. a temp dir in tests.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_string_lossy().into_owned(),
            ..Self::default()
        }
    }

    /// The audit directory with `~` and `$VARS` expanded.
    pub fn dir_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.dir).into_owned())
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir_path().join(&self.file_name)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecConfig {
    #[serde(default = "default_exec_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_output")]
    pub max_output_bytes: usize,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_exec_timeout(),
            max_output_bytes: default_max_output(),
        }
    }
}

/// Per-session command history, kept across hook invocations.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Save named sessions under `dir` so separate processes share them.
    #[serde(default = "default_true")]
    pub persist: bool,
    #[serde(default = "default_session_dir")]
    pub dir: String,
    /// Sessions untouched for this long are forgotten, in memory and on disk.
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,
    /// Prior commands matched against workflow patterns.
    #[serde(default = "default_window")]
    pub window: usize,
    /// Ask only once per session for the same command line.
    #[serde(default = "default_true")]
    pub dedup_warnings: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            persist: true,
            dir: default_session_dir(),
            idle_ttl_secs: default_idle_ttl_secs(),
            window: default_window(),
            dedup_warnings: true,
        }
    }
}

impl SessionConfig {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_string_lossy().into_owned(),
            ..Self::default()
        }
    }

    pub fn dir_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.dir).into_owned())
    }

    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }
}

/// What-will-be-destroyed preview for gated commands.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PreviewConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Limit for each `git` query the preview runs.
    #[serde(default = "default_git_timeout_secs")]
    pub git_timeout_secs: u64,
    /// Paths named in the reason before "... and N more".
    #[serde(default = "default_max_listed")]
    pub max_listed: usize,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            git_timeout_secs: default_git_timeout_secs(),
            max_listed: default_max_listed(),
        }
    }
}

impl PreviewConfig {
    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.git_timeout_secs.max(1))
    }
}

/// Copies taken before a previewed destruction.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackupConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_backup_dir")]
    pub dir: String,
    /// Backups kept per project; the oldest go first.
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,
    /// Files copied per backup.
    #[serde(default = "default_max_backup_files")]
    pub max_files: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_backup_dir(),
            max_backups: default_max_backups(),
            max_files: default_max_backup_files(),
        }
    }
}

impl BackupConfig {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_string_lossy().into_owned(),
            ..Self::default()
        }
    }

    pub fn dir_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.dir).into_owned())
    }
}

fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".into()
}
fn default_ttl_secs() -> u64 {
    300
}
fn default_sweep_secs() -> u64 {
    30
}
fn default_critical_threshold() -> f64 {
    0.9
}
fn default_audit_dir() -> String {
    "~/.local/share/agent-gate/audit".into()
}
fn default_audit_file() -> String {
    "audit.log".into()
}
fn default_flush_ms() -> u64 {
    1000
}
fn default_max_file_bytes() -> u64 {
    100 * 1024 * 1024
}
fn default_max_archives() -> usize {
    10
}
fn default_kdf_iterations() -> u32 {
    210_000
}
fn default_exec_timeout() -> u64 {
    120
}
fn default_max_output() -> usize {
    1024 * 1024
}
fn default_session_dir() -> String {
    "~/.local/share/agent-gate/sessions".into()
}
fn default_idle_ttl_secs() -> u64 {
    7 * 24 * 60 * 60
}
fn default_window() -> usize {
    3
}
fn default_git_timeout_secs() -> u64 {
    10
}
fn default_max_listed() -> usize {
    10
}
fn default_backup_dir() -> String {
    "~/.local/share/agent-gate/backups".into()
}
fn default_max_backups() -> usize {
    50
}
fn default_max_backup_files() -> usize {
    100
}

// ── Overlay types (user config that merges with defaults) ──

#[derive(Debug, Deserialize, Default)]
struct ConfigOverlay {
    #[serde(default)]
    settings: SettingsOverlay,
    #[serde(default)]
    commands: CommandsOverlay,
    #[serde(default)]
    git: GitOverlay,
    #[serde(default)]
    find: FindOverlay,
    #[serde(default)]
    rules: UserRules,
    #[serde(default)]
    threat: ThreatOverlay,
    #[serde(default)]
    auth: AuthOverlay,
    #[serde(default)]
    audit: AuditOverlay,
    #[serde(default)]
    exec: ExecOverlay,
    #[serde(default)]
    session: SessionOverlay,
    #[serde(default)]
    preview: PreviewOverlay,
    #[serde(default)]
    backup: BackupOverlay,
}

#[derive(Debug, Deserialize, Default)]
struct SettingsOverlay {
    log_level: Option<String>,
    escalate_critical: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct CommandsOverlay {
    #[serde(default)]
    replace: bool,
    #[serde(default)]
    safe: Vec<String>,
    #[serde(default)]
    dangerous: Vec<String>,
    #[serde(default)]
    builtin: Vec<String>,
    #[serde(default)]
    remove_safe: Vec<String>,
    #[serde(default)]
    remove_dangerous: Vec<String>,
    #[serde(default)]
    remove_builtin: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
struct GitOverlay {
    #[serde(default)]
    replace: bool,
    #[serde(default)]
    read_only: Vec<String>,
    #[serde(default)]
    remove_read_only: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
struct FindOverlay {
    #[serde(default)]
    replace: bool,
    #[serde(default)]
    exec_flags: Vec<String>,
    #[serde(default)]
    remove_exec_flags: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ThreatOverlay {
    cache_ttl_secs: Option<u64>,
    critical_threshold: Option<f64>,
    #[serde(default)]
    indicators: Vec<IndicatorInput>,
}

#[derive(Debug, Deserialize, Default)]
struct AuthOverlay {
    token_ttl_secs: Option<u64>,
    sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct AuditOverlay {
    dir: Option<String>,
    file_name: Option<String>,
    flush_interval_ms: Option<u64>,
    max_file_bytes: Option<u64>,
    max_archives: Option<usize>,
    kdf_iterations: Option<u32>,
    webhook_url: Option<String>,
    console_alerts: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct ExecOverlay {
    timeout_secs: Option<u64>,
    max_output_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct SessionOverlay {
    persist: Option<bool>,
    dir: Option<String>,
    idle_ttl_secs: Option<u64>,
    window: Option<usize>,
    dedup_warnings: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct PreviewOverlay {
    enabled: Option<bool>,
    git_timeout_secs: Option<u64>,
    max_listed: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct BackupOverlay {
    enabled: Option<bool>,
    dir: Option<String>,
    max_backups: Option<usize>,
    max_files: Option<usize>,
}

// ── Merge logic ──

/// Merge a user list into a default list.
/// In replace mode: user list replaces default entirely.
/// In merge mode: remove items first, then extend with additions (deduped).
fn merge_list(base: &mut Vec<String>, add: Vec<String>, remove: &[String], replace: bool) {
    if replace {
        *base = add;
    } else {
        base.retain(|item| !remove.contains(item));
        for item in add {
            if !base.contains(&item) {
                base.push(item);
            }
        }
    }
}

fn set_if<T>(target: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *target = v;
    }
}

impl Config {
    /// Load the default embedded configuration.
    pub fn default_config() -> Self {
        toml::from_str(DEFAULT_CONFIG).expect("embedded default config must parse")
    }

    /// Load configuration with resolution order:
    /// 1. Start with embedded defaults
    /// 2. Merge user overlay from ~/.config/agent-gate/config.toml (if exists)
    ///
    /// A broken overlay is reported and ignored; the defaults still apply.
    pub fn load() -> Self {
        let mut config = Self::default_config();
        let Some(home) = std::env::var_os("HOME") else {
            return config;
        };
        let path = Path::new(&home).join(USER_CONFIG_PATH);
        if !path.exists() {
            return config;
        }
        if let Err(e) = config.merge_file(&path) {
            log::warn!("ignoring user config {}: {e}", path.display());
        }
        config
    }

    /// Merge an overlay file on top of this config.
    pub fn merge_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path)?;
        self.merge_str(&content)
    }

    /// Merge an overlay given as TOML text.
    pub fn merge_str(&mut self, toml_str: &str) -> Result<(), ConfigError> {
        let overlay: ConfigOverlay = toml::from_str(toml_str)?;
        self.apply_overlay(overlay);
        Ok(())
    }

    /// Apply an overlay on top of this config (merge semantics).
    fn apply_overlay(&mut self, overlay: ConfigOverlay) {
        let s = overlay.settings;
        set_if(&mut self.settings.log_level, s.log_level);
        set_if(&mut self.settings.escalate_critical, s.escalate_critical);

        let c = overlay.commands;
        merge_list(&mut self.commands.safe, c.safe, &c.remove_safe, c.replace);
        merge_list(
            &mut self.commands.dangerous,
            c.dangerous,
            &c.remove_dangerous,
            c.replace,
        );
        merge_list(
            &mut self.commands.builtin,
            c.builtin,
            &c.remove_builtin,
            c.replace,
        );

        let g = overlay.git;
        merge_list(
            &mut self.git.read_only,
            g.read_only,
            &g.remove_read_only,
            g.replace,
        );

        let f = overlay.find;
        merge_list(
            &mut self.find.exec_flags,
            f.exec_flags,
            &f.remove_exec_flags,
            f.replace,
        );

        let r = overlay.rules;
        merge_list(&mut self.rules.safe, r.safe, &[], false);
        merge_list(&mut self.rules.dangerous, r.dangerous, &[], false);

        let t = overlay.threat;
        set_if(&mut self.threat.cache_ttl_secs, t.cache_ttl_secs);
        set_if(&mut self.threat.critical_threshold, t.critical_threshold);
        self.threat.indicators.extend(t.indicators);

        let a = overlay.auth;
        set_if(&mut self.auth.token_ttl_secs, a.token_ttl_secs);
        set_if(&mut self.auth.sweep_interval_secs, a.sweep_interval_secs);

        let au = overlay.audit;
        set_if(&mut self.audit.dir, au.dir);
        set_if(&mut self.audit.file_name, au.file_name);
        set_if(&mut self.audit.flush_interval_ms, au.flush_interval_ms);
        set_if(&mut self.audit.max_file_bytes, au.max_file_bytes);
        set_if(&mut self.audit.max_archives, au.max_archives);
        set_if(&mut self.audit.kdf_iterations, au.kdf_iterations);
        if au.webhook_url.is_some() {
            self.audit.webhook_url = au.webhook_url;
        }
        set_if(&mut self.audit.console_alerts, au.console_alerts);

        let e = overlay.exec;
        set_if(&mut self.exec.timeout_secs, e.timeout_secs);
        set_if(&mut self.exec.max_output_bytes, e.max_output_bytes);

        let se = overlay.session;
        set_if(&mut self.session.persist, se.persist);
        set_if(&mut self.session.dir, se.dir);
        set_if(&mut self.session.idle_ttl_secs, se.idle_ttl_secs);
        set_if(&mut self.session.window, se.window);
        set_if(&mut self.session.dedup_warnings, se.dedup_warnings);

        let p = overlay.preview;
        set_if(&mut self.preview.enabled, p.enabled);
        set_if(&mut self.preview.git_timeout_secs, p.git_timeout_secs);
        set_if(&mut self.preview.max_listed, p.max_listed);

        let b = overlay.backup;
        set_if(&mut self.backup.enabled, b.enabled);
        set_if(&mut self.backup.dir, b.dir);
        set_if(&mut self.backup.max_backups, b.max_backups);
        set_if(&mut self.backup.max_files, b.max_files);
    }
}

/// Source of user-defined routing rules.
pub trait RuleStore {
    fn load_rules(&self) -> Result<UserRules, ConfigError>;
}

impl RuleStore for Config {
    fn load_rules(&self) -> Result<UserRules, ConfigError> {
        Ok(self.rules.clone())
    }
}

/// Rules read from the `[rules]` table of a TOML file on every reload.
#[derive(Debug, Clone)]
pub struct RuleFile {
    path: PathBuf,
}

impl RuleFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RuleStore for RuleFile {
    fn load_rules(&self) -> Result<UserRules, ConfigError> {
        #[derive(Deserialize)]
        struct RulesOnly {
            #[serde(default)]
            rules: UserRules,
        }

        if !self.path.exists() {
            return Ok(UserRules::default());
        }
        let content = std::fs::read_to_string(&self.path)?;
        let parsed: RulesOnly = toml::from_str(&content)?;
        Ok(parsed.rules)
    }
}
