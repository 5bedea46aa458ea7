//! Copies of what a destructive command is about to remove.
//!
//! Each backup is a directory `<dir>/<project>/<stamp>/` holding
//! `files/` (copies laid out relative to the working directory),
//! `git_state/` (branch, commit, status and uncommitted diff when inside a
//! repository) and `metadata.json` mapping every copy back to its original.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::config::{BackupConfig, PreviewConfig};
use crate::consequence::{Consequences, run_git};
use crate::error::BackupError;
use crate::redact;
use crate::router::CommandInvocation;

const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%3f";
const METADATA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileMapping {
    pub original: PathBuf,
    /// Path of the copy, relative to the backup directory.
    pub backup: PathBuf,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BackupMetadata<'a> {
    timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
    command: String,
    cwd: &'a Path,
    consequences: &'a [Consequences],
    file_mappings: &'a [FileMapping],
    version: u32,
}

/// Where a backup landed and what it holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    pub path: PathBuf,
    pub files: Vec<FileMapping>,
    pub git_state: bool,
}

pub struct BackupManager {
    dir: PathBuf,
    max_backups: usize,
    max_files: usize,
    git_timeout: Duration,
}

impl BackupManager {
    pub fn new(dir: impl Into<PathBuf>, max_backups: usize, max_files: usize) -> Self {
        Self {
            dir: dir.into(),
            max_backups,
            max_files,
            git_timeout: Duration::from_secs(10),
        }
    }

    pub fn from_config(backup: &BackupConfig, preview: &PreviewConfig) -> Self {
        Self {
            git_timeout: preview.git_timeout(),
            ..Self::new(backup.dir_path(), backup.max_backups, backup.max_files)
        }
    }

    /// Back up the files `consequences` name, then prune old backups.
    ///
    /// Individual copy failures are logged and skipped; only failing to
    /// create the backup directory or its metadata is an error.
    pub async fn create(
        &self,
        inv: &CommandInvocation,
        consequences: &[Consequences],
    ) -> Result<BackupRecord, BackupError> {
        if consequences.iter().all(Consequences::is_empty) {
            return Err(BackupError::Empty);
        }
        let cwd = inv
            .context()
            .cwd
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        let project = cwd
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string());
        let project_dir = self.dir.join(project);
        let now = Utc::now();
        let target = create_unique(&project_dir, now)?;

        let mut files = Vec::new();
        let originals = consequences
            .iter()
            .flat_map(|c| c.files.iter().map(|f| c.resolve(f)))
            .filter(|p| p.is_file())
            .take(self.max_files);
        for original in originals {
            let relative = Path::new("files").join(relative_within(&original, &cwd));
            let dest = target.join(&relative);
            let copied = dest
                .parent()
                .map_or(Ok(()), fs::create_dir_all)
                .and_then(|_| fs::copy(&original, &dest));
            match copied {
                Ok(_) => files.push(FileMapping {
                    original,
                    backup: relative,
                }),
                Err(e) => log::warn!("backup of {} skipped: {e}", original.display()),
            }
        }

        let git_state = self.capture_git_state(&cwd, &target.join("git_state")).await;

        let metadata = BackupMetadata {
            timestamp: now,
            session_id: inv.context().session_id.as_deref(),
            command: redact::redact_str(&inv.line()),
            cwd: &cwd,
            consequences,
            file_mappings: &files,
            version: METADATA_VERSION,
        };
        fs::write(
            target.join("metadata.json"),
            serde_json::to_vec_pretty(&metadata)?,
        )?;

        if let Err(e) = prune(&project_dir, self.max_backups) {
            log::warn!("pruning backups in {} failed: {e}", project_dir.display());
        }
        log::info!("backed up {} files to {}", files.len(), target.display());
        Ok(BackupRecord {
            path: target,
            files,
            git_state,
        })
    }

    /// Record branch, commit, status and uncommitted diff. `false` outside a repo.
    async fn capture_git_state(&self, cwd: &Path, dir: &Path) -> bool {
        let Some(branch) = run_git(cwd, &["rev-parse", "--abbrev-ref", "HEAD"], self.git_timeout).await
        else {
            return false;
        };
        let mut captured = vec![("branch.txt", branch.trim().to_string())];
        if let Some(commit) = run_git(cwd, &["rev-parse", "HEAD"], self.git_timeout).await {
            captured.push(("commit.txt", commit.trim().to_string()));
        }
        if let Some(status) = run_git(cwd, &["status", "--porcelain"], self.git_timeout).await {
            captured.push(("status.txt", status));
        }
        if let Some(diff) = run_git(cwd, &["diff", "HEAD"], self.git_timeout).await
            && !diff.is_empty()
        {
            captured.push(("uncommitted.diff", diff));
        }

        if let Err(e) = fs::create_dir_all(dir) {
            log::warn!("git state not saved: {e}");
            return false;
        }
        for (name, text) in captured {
            if let Err(e) = fs::write(dir.join(name), text) {
                log::warn!("git state {name} not saved: {e}");
            }
        }
        true
    }
}

/// Create `<dir>/<stamp>`, moving the stamp forward a millisecond on collision.
fn create_unique(dir: &Path, at: DateTime<Utc>) -> Result<PathBuf, BackupError> {
    fs::create_dir_all(dir)?;
    let mut stamp = at;
    loop {
        let target = dir.join(stamp.format(STAMP_FORMAT).to_string());
        match fs::create_dir(&target) {
            Ok(()) => return Ok(target),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                stamp += TimeDelta::milliseconds(1);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// `path` below `base` when it is inside it, otherwise its own components.
/// Only normal components survive, so the result never leaves the backup.
fn relative_within(path: &Path, base: &Path) -> PathBuf {
    let relative = path.strip_prefix(base).unwrap_or(path);
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect()
}

/// Remove the oldest backups in a project directory beyond `keep`.
fn prune(project_dir: &Path, keep: usize) -> std::io::Result<usize> {
    let mut backups: Vec<PathBuf> = fs::read_dir(project_dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
        .map(|e| e.path())
        .collect();
    backups.sort();
    let excess = backups.len().saturating_sub(keep);
    for old in backups.iter().take(excess) {
        fs::remove_dir_all(old)?;
    }
    Ok(excess)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consequence::ConsequencePreview;
    use crate::router::ExecutionContext;
    use tempfile::TempDir;

    fn inv_in(line: &str, cwd: &Path) -> CommandInvocation {
        CommandInvocation::from_command_line(
            line,
            ExecutionContext::agent().with_cwd(cwd).with_session("s1"),
        )
    }

    async fn consequences(inv: &CommandInvocation) -> Vec<Consequences> {
        ConsequencePreview::new(Duration::from_secs(10), 10)
            .analyze(inv)
            .await
    }

    #[tokio::test]
    async fn copies_files_and_writes_metadata() {
        let work = TempDir::new().unwrap();
        let store = TempDir::new().unwrap();
        fs::create_dir_all(work.path().join("src")).unwrap();
        fs::write(work.path().join("src/lib.rs"), "pub fn keep() {}\n").unwrap();
        fs::write(work.path().join("README.md"), "# hi\n").unwrap();

        let inv = inv_in("rm -rf src README.md --password hunter2", work.path());
        let found = consequences(&inv).await;
        let manager = BackupManager::new(store.path(), 5, 100);
        let record = manager.create(&inv, &found).await.unwrap();

        assert!(record.path.starts_with(store.path()));
        assert_eq!(record.files.len(), 2);
        assert_eq!(
            fs::read_to_string(record.path.join("files/src/lib.rs")).unwrap(),
            "pub fn keep() {}\n"
        );
        assert!(record.path.join("files/README.md").is_file());

        let meta: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(record.path.join("metadata.json")).unwrap())
                .unwrap();
        assert_eq!(meta["sessionId"], "s1");
        assert_eq!(meta["version"], 1);
        assert_eq!(meta["fileMappings"].as_array().unwrap().len(), 2);
        let command = meta["command"].as_str().unwrap();
        assert!(command.starts_with("rm -rf"));
        assert!(!command.contains("hunter2"));
    }

    #[tokio::test]
    async fn file_limit_is_respected() {
        let work = TempDir::new().unwrap();
        let store = TempDir::new().unwrap();
        for i in 0..5 {
            fs::write(work.path().join(format!("f{i}.txt")), "x\n").unwrap();
        }
        let inv = inv_in("rm *.txt", work.path());
        let found = consequences(&inv).await;
        let record = BackupManager::new(store.path(), 5, 2)
            .create(&inv, &found)
            .await
            .unwrap();
        assert_eq!(record.files.len(), 2);
    }

    #[tokio::test]
    async fn nothing_to_back_up_is_an_error() {
        let work = TempDir::new().unwrap();
        let store = TempDir::new().unwrap();
        let inv = inv_in("rm missing", work.path());
        let result = BackupManager::new(store.path(), 5, 100).create(&inv, &[]).await;
        assert!(matches!(result, Err(BackupError::Empty)));
    }

    #[tokio::test]
    async fn old_backups_are_pruned() {
        let work = TempDir::new().unwrap();
        let store = TempDir::new().unwrap();
        fs::write(work.path().join("a.txt"), "x\n").unwrap();
        let inv = inv_in("rm a.txt", work.path());
        let found = consequences(&inv).await;
        let manager = BackupManager::new(store.path(), 2, 100);
        let mut paths = Vec::new();
        for _ in 0..4 {
            paths.push(manager.create(&inv, &found).await.unwrap().path);
        }
        let project = paths[0].parent().unwrap();
        let left: Vec<PathBuf> = {
            let mut v: Vec<PathBuf> = fs::read_dir(project)
                .unwrap()
                .map(|e| e.unwrap().path())
                .collect();
            v.sort();
            v
        };
        assert_eq!(left, paths[2..].to_vec());
    }

    #[test]
    fn relative_paths_never_escape() {
        let base = Path::new("/work/app");
        assert_eq!(
            relative_within(Path::new("/work/app/src/a.rs"), base),
            PathBuf::from("src/a.rs")
        );
        assert_eq!(
            relative_within(Path::new("/work/app/../other/b.rs"), base),
            PathBuf::from("other/b.rs")
        );
        assert_eq!(
            relative_within(Path::new("/etc/hosts"), base),
            PathBuf::from("etc/hosts")
        );
    }

    #[test]
    fn colliding_stamps_move_forward() {
        let dir = TempDir::new().unwrap();
        let at = Utc::now();
        let first = create_unique(dir.path(), at).unwrap();
        let second = create_unique(dir.path(), at).unwrap();
        assert_ne!(first, second);
        assert!(first < second);
    }
}
