//! What a destructive command would actually destroy.
//!
//! For `rm` and `git rm` the targets are resolved against the working
//! directory and walked on disk. For `git reset --hard`, `git clean`,
//! `git checkout --` and `git stash drop` the repository is asked, read-only,
//! what the command would throw away. Nothing here modifies the filesystem.

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;
use tokio::time::timeout;
use walkdir::WalkDir;

use crate::config::PreviewConfig;
use crate::router::CommandInvocation;

/// Words that separate one command from the next in an argument list.
const SEPARATORS: &[&str] = &["&&", "||", ";", "|", "|&", "&"];

/// Files counted per target before the walk stops.
const MAX_WALKED_FILES: usize = 10_000;

/// Targets never walked: the filesystem root and bare relative markers.
const SKIPPED_TARGETS: &[&str] = &["/", ".", ".."];

const TEXT_EXTENSIONS: &[&str] = &[
    "py", "js", "ts", "tsx", "jsx", "json", "yaml", "yml", "md", "txt", "sh", "bash", "zsh",
    "fish", "html", "css", "scss", "sass", "less", "java", "kt", "scala", "go", "rs", "rb", "php",
    "c", "cpp", "h", "hpp", "cs", "swift", "m", "sql", "graphql", "proto", "xml", "toml", "ini",
    "cfg", "env", "vue", "svelte", "astro",
];
const TEXT_NAMES: &[&str] = &["Makefile", "Dockerfile", ".gitignore", ".dockerignore", ".env"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsequenceKind {
    Delete,
    GitRm,
    GitResetHard,
    GitClean,
    GitCheckoutDiscard,
    GitStashDrop,
}

/// Files and directories one command segment would destroy.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Consequences {
    pub kind: ConsequenceKind,
    /// Directory the listed paths are relative to, when they are relative.
    pub base: PathBuf,
    pub files: Vec<String>,
    pub dirs: Vec<String>,
    pub total_lines: u64,
    pub total_bytes: u64,
    /// A walk stopped early; the totals are lower bounds.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
    /// Last line of `git ... --stat`, e.g. "3 files changed, 40 insertions(+)".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stat_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stash_ref: Option<String>,
}

impl Consequences {
    fn new(kind: ConsequenceKind, base: &Path) -> Self {
        Self {
            kind,
            base: base.to_path_buf(),
            files: Vec::new(),
            dirs: Vec::new(),
            total_lines: 0,
            total_bytes: 0,
            truncated: false,
            stat_summary: None,
            stash_ref: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.dirs.is_empty()
    }

    /// Absolute location of a listed path.
    pub fn resolve(&self, listed: &str) -> PathBuf {
        self.base.join(listed)
    }

    /// One-line description naming at most `max_listed` paths.
    pub fn summary(&self, max_listed: usize) -> String {
        let files = count(self.files.len(), "file", "files");
        let mut text = match self.kind {
            ConsequenceKind::Delete | ConsequenceKind::GitRm => {
                let mut parts = Vec::new();
                if !self.files.is_empty() {
                    parts.push(files);
                }
                if !self.dirs.is_empty() {
                    parts.push(count(self.dirs.len(), "directory", "directories"));
                }
                let at_least = if self.truncated { "at least " } else { "" };
                format!("will delete {at_least}{}", parts.join(", "))
            }
            ConsequenceKind::GitResetHard | ConsequenceKind::GitCheckoutDiscard => {
                format!("uncommitted changes will be discarded: {files}")
            }
            ConsequenceKind::GitClean => {
                let mut text = format!("untracked files will be deleted: {files}");
                if !self.dirs.is_empty() {
                    text.push_str(", ");
                    text.push_str(&count(self.dirs.len(), "directory", "directories"));
                }
                text
            }
            ConsequenceKind::GitStashDrop => format!(
                "stash will be permanently deleted: {} ({files})",
                self.stash_ref.as_deref().unwrap_or("stash@{0}")
            ),
        };
        if self.total_lines > 0 {
            text.push_str(&format!(" ({} lines)", self.total_lines));
        }
        if self.total_bytes > 1024 {
            text.push_str(&format!(" [{:.1} KB]", self.total_bytes as f64 / 1024.0));
        }

        let listed: Vec<&str> = if self.files.is_empty() {
            self.dirs.iter().map(String::as_str).collect()
        } else {
            self.files.iter().map(String::as_str).collect()
        };
        if !listed.is_empty() {
            text.push_str(": ");
            text.push_str(&listed[..listed.len().min(max_listed)].join(", "));
            if listed.len() > max_listed {
                text.push_str(&format!(" ... and {} more", listed.len() - max_listed));
            }
        }
        if let Some(stat) = &self.stat_summary {
            text.push_str(&format!(" ({stat})"));
        }
        text
    }

    fn add_file(&mut self, listed: String, path: &Path) {
        let (bytes, lines) = file_stats(path);
        self.total_bytes += bytes;
        self.total_lines += lines;
        self.files.push(listed);
    }

    /// Add a directory and every file below it, stopping at the walk limit.
    fn add_tree(&mut self, listed: String, path: &Path) {
        self.dirs.push(listed);
        let files = WalkDir::new(path)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file());
        for (n, entry) in files.enumerate() {
            if n >= MAX_WALKED_FILES {
                self.truncated = true;
                break;
            }
            self.add_file(entry.path().display().to_string(), entry.path());
        }
    }
}

fn count(n: usize, one: &str, many: &str) -> String {
    format!("{n} {}", if n == 1 { one } else { many })
}

fn is_text_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
    TEXT_NAMES.contains(&name) || TEXT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
}

/// Size in bytes and, for source-like files, the line count.
fn file_stats(path: &Path) -> (u64, u64) {
    let Ok(meta) = fs::metadata(path) else {
        return (0, 0);
    };
    let lines = if is_text_file(path) {
        fs::File::open(path)
            .map(|f| BufReader::new(f).split(b'\n').count() as u64)
            .unwrap_or(0)
    } else {
        0
    };
    (meta.len(), lines)
}

/// The argument list split into one word slice per command.
fn segments(inv: &CommandInvocation) -> Vec<Vec<&str>> {
    let words: Vec<&str> = std::iter::once(inv.command())
        .chain(inv.args().iter().map(String::as_str))
        .collect();
    words
        .split(|w| SEPARATORS.contains(w))
        .filter(|s| !s.is_empty())
        .map(|s| {
            let s = if s.first() == Some(&"sudo") { &s[1..] } else { s };
            s.to_vec()
        })
        .filter(|s| !s.is_empty())
        .collect()
}

fn targets<'a>(words: &[&'a str]) -> Vec<&'a str> {
    words.iter().copied().filter(|w| !w.starts_with('-')).collect()
}

/// Paths a command may remove or move away, as written.
///
/// Covers `rm`, `git rm` and the sources of `mv`. The filesystem root and
/// `.`/`..` are left out.
pub fn affected_paths(inv: &CommandInvocation) -> Vec<String> {
    let mut paths = Vec::new();
    for words in segments(inv) {
        let name = crate::parse::base_command(words[0]);
        let found: Vec<&str> = match (name.as_str(), words.get(1).copied()) {
            ("rm", _) => targets(&words[1..]),
            ("git", Some("rm")) => targets(&words[2..]),
            ("mv", _) => {
                let t = targets(&words[1..]);
                t[..t.len().saturating_sub(1)].to_vec()
            }
            _ => Vec::new(),
        };
        paths.extend(
            found
                .into_iter()
                .filter(|p| !SKIPPED_TARGETS.contains(p))
                .map(String::from),
        );
    }
    paths
}

/// Runs the read-only queries behind a preview.
pub struct ConsequencePreview {
    git_timeout: Duration,
    max_listed: usize,
}

impl ConsequencePreview {
    pub fn new(git_timeout: Duration, max_listed: usize) -> Self {
        Self {
            git_timeout,
            max_listed,
        }
    }

    pub fn from_config(config: &PreviewConfig) -> Self {
        Self::new(config.git_timeout(), config.max_listed)
    }

    pub fn max_listed(&self) -> usize {
        self.max_listed
    }

    /// Consequences of each destructive segment of `inv`.
    ///
    /// Paths are resolved against the invocation's working directory, or the
    /// process's when it has none. Segments with nothing to lose are skipped.
    pub async fn analyze(&self, inv: &CommandInvocation) -> Vec<Consequences> {
        let cwd = inv
            .context()
            .cwd
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        let mut found = Vec::new();
        for words in segments(inv) {
            if let Some(c) = self.analyze_segment(&words, &cwd).await
                && !c.is_empty()
            {
                found.push(c);
            }
        }
        found
    }

    async fn analyze_segment(&self, words: &[&str], cwd: &Path) -> Option<Consequences> {
        let name = crate::parse::base_command(words[0]);
        let rest = &words[1..];
        match (name.as_str(), rest.first().copied()) {
            ("rm", _) => Some(delete_targets(ConsequenceKind::Delete, rest, cwd)),
            ("git", Some("rm")) => Some(delete_targets(ConsequenceKind::GitRm, &rest[1..], cwd)),
            ("git", Some("reset")) if rest.contains(&"--hard") => self.git_reset_hard(cwd).await,
            ("git", Some("clean")) => self.git_clean(cwd).await,
            ("git", Some("checkout")) if rest.contains(&"--") || rest.last() == Some(&".") => {
                self.git_checkout_discard(cwd).await
            }
            ("git", Some("stash")) if rest.get(1) == Some(&"drop") => {
                let stash_ref = rest
                    .get(2)
                    .filter(|r| r.starts_with("stash@{"))
                    .map_or("stash@{0}", |r| *r);
                self.git_stash_drop(cwd, stash_ref).await
            }
            _ => None,
        }
    }

    async fn git_reset_hard(&self, cwd: &Path) -> Option<Consequences> {
        let root = self.repo_root(cwd).await?;
        let status = self.git(cwd, &["status", "--porcelain"]).await?;
        let mut c = Consequences::new(ConsequenceKind::GitResetHard, &root);
        for line in status.lines().filter(|l| l.len() > 3) {
            let (code, path) = line.split_at(2);
            let path = path.trim();
            let path = path.rsplit_once(" -> ").map_or(path, |(_, new)| new);
            if code.contains(['M', 'A']) {
                let full = c.resolve(path);
                c.add_file(path.to_string(), &full);
            }
        }
        if c.is_empty() {
            return None;
        }
        c.stat_summary = self.stat_tail(cwd, &["diff", "HEAD", "--stat"]).await;
        Some(c)
    }

    async fn git_clean(&self, cwd: &Path) -> Option<Consequences> {
        let dry_run = self.git(cwd, &["clean", "-dfn"]).await?;
        let mut c = Consequences::new(ConsequenceKind::GitClean, cwd);
        for path in dry_run.lines().filter_map(|l| l.strip_prefix("Would remove ")) {
            let path = path.trim();
            let full = c.resolve(path);
            if full.is_dir() {
                c.add_tree(path.to_string(), &full);
            } else {
                c.add_file(path.to_string(), &full);
            }
        }
        (!c.is_empty()).then_some(c)
    }

    async fn git_checkout_discard(&self, cwd: &Path) -> Option<Consequences> {
        let root = self.repo_root(cwd).await?;
        let names = self.git(cwd, &["diff", "--name-only"]).await?;
        let mut c = Consequences::new(ConsequenceKind::GitCheckoutDiscard, &root);
        for path in names.lines().map(str::trim).filter(|p| !p.is_empty()) {
            let full = c.resolve(path);
            c.add_file(path.to_string(), &full);
        }
        if c.is_empty() {
            return None;
        }
        c.stat_summary = self.stat_tail(cwd, &["diff", "--stat"]).await;
        Some(c)
    }

    async fn git_stash_drop(&self, cwd: &Path, stash_ref: &str) -> Option<Consequences> {
        let root = self.repo_root(cwd).await?;
        let stat = self.git(cwd, &["stash", "show", "--stat", stash_ref]).await?;
        let mut c = Consequences::new(ConsequenceKind::GitStashDrop, &root);
        c.stash_ref = Some(stash_ref.to_string());
        c.files = stat
            .lines()
            .filter_map(|l| l.split_once('|'))
            .map(|(path, _)| path.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        if c.is_empty() {
            return None;
        }
        c.stat_summary = stat.lines().last().map(|l| l.trim().to_string());
        Some(c)
    }

    async fn repo_root(&self, cwd: &Path) -> Option<PathBuf> {
        let out = self.git(cwd, &["rev-parse", "--show-toplevel"]).await?;
        Some(PathBuf::from(out.trim()))
    }

    async fn stat_tail(&self, cwd: &Path, args: &[&str]) -> Option<String> {
        let out = self.git(cwd, args).await?;
        out.lines()
            .last()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
    }

    async fn git(&self, cwd: &Path, args: &[&str]) -> Option<String> {
        run_git(cwd, args, self.git_timeout).await
    }
}

/// Stdout of a successful `git` run in `cwd`; `None` on any failure.
pub(crate) async fn run_git(cwd: &Path, args: &[&str], limit: Duration) -> Option<String> {
    let mut cmd = Command::new("git");
    cmd.args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    match timeout(limit, cmd.output()).await {
        Ok(Ok(out)) if out.status.success() => {
            Some(String::from_utf8_lossy(&out.stdout).into_owned())
        }
        Ok(Ok(_)) => None,
        Ok(Err(e)) => {
            log::debug!("git {} failed to start: {e}", args.join(" "));
            None
        }
        Err(_) => {
            log::warn!("git {} timed out after {limit:?}", args.join(" "));
            None
        }
    }
}

/// Resolve `rm`-style targets, expanding `~` and simple globs.
fn delete_targets(kind: ConsequenceKind, words: &[&str], cwd: &Path) -> Consequences {
    let mut c = Consequences::new(kind, cwd);
    for target in targets(words) {
        if SKIPPED_TARGETS.contains(&target) {
            continue;
        }
        let expanded = shellexpand::tilde(target);
        let path = cwd.join(&*expanded);
        if target.contains(['*', '?', '[']) {
            for matched in expand_glob(&path) {
                add_path(&mut c, &matched);
            }
        } else if path.symlink_metadata().is_ok() {
            add_path(&mut c, &path);
        }
    }
    c
}

fn add_path(c: &mut Consequences, path: &Path) {
    let listed = path.display().to_string();
    if path.is_dir() && !path.is_symlink() {
        c.add_tree(listed, path);
    } else {
        c.add_file(listed, path);
    }
}

/// Entries of the glob's parent directory whose names match its last component.
fn expand_glob(pattern: &Path) -> Vec<PathBuf> {
    let (Some(parent), Some(name)) = (pattern.parent(), pattern.file_name()) else {
        return Vec::new();
    };
    let name = name.to_string_lossy();
    let glob_parent = parent.components().any(|c| match c {
        Component::Normal(p) => p.to_string_lossy().contains(['*', '?', '[']),
        _ => false,
    });
    if glob_parent {
        return Vec::new();
    }
    let Ok(entries) = fs::read_dir(parent) else {
        return Vec::new();
    };
    let mut matched: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .filter(|e| glob_match::glob_match(&name, &e.file_name().to_string_lossy()))
        .map(|e| e.path())
        .collect();
    matched.sort();
    matched
}
