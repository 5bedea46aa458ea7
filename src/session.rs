//! Session histories shared across hook invocations.
//!
//! The hook runs as one process per command, so a history that lived only
//! in memory would never see the second half of a workflow pattern. Named
//! sessions are therefore written to `<dir>/session-<hash>.json` after every
//! update and read back when a process first touches them. Callers without a
//! session id share one anonymous history that is never written to disk.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::config::SessionConfig;
use crate::threat::workflow::SessionHistory;

/// Key for callers that do not name a session.
pub const ANONYMOUS_SESSION: &str = "default";

const FILE_PREFIX: &str = "session-";
const FILE_SUFFIX: &str = ".json";

pub struct SessionStore {
    dir: Option<PathBuf>,
    window: usize,
    idle_ttl: Duration,
    sessions: Mutex<HashMap<String, SessionHistory>>,
}

impl SessionStore {
    /// A store that forgets everything when the process exits.
    pub fn in_memory(window: usize, idle_ttl: Duration) -> Self {
        Self {
            dir: None,
            window,
            idle_ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// A store that saves named sessions under `dir`.
    pub fn persistent(dir: impl Into<PathBuf>, window: usize, idle_ttl: Duration) -> Self {
        Self {
            dir: Some(dir.into()),
            ..Self::in_memory(window, idle_ttl)
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        if config.persist {
            Self::persistent(config.dir_path(), config.window, config.idle_ttl())
        } else {
            Self::in_memory(config.window, config.idle_ttl())
        }
    }

    /// Run `f` against a session's history, loading it first and saving it after.
    ///
    /// Persistence is best effort: a failed read starts a fresh history and
    /// a failed write is logged.
    pub fn update<R>(&self, session_id: Option<&str>, f: impl FnOnce(&mut SessionHistory) -> R) -> R {
        let key = session_id.unwrap_or(ANONYMOUS_SESSION);
        let path = session_id.and_then(|id| self.path_for(id));

        let mut sessions = self.sessions.lock();
        let history = sessions.entry(key.to_string()).or_insert_with(|| {
            path.as_deref()
                .and_then(|p| self.load(p))
                .unwrap_or_else(|| SessionHistory::new(self.window))
        });
        let result = f(history);

        if let Some(path) = &path
            && let Err(e) = save(path, history)
        {
            log::warn!("failed to save session {key}: {e}");
        }
        result
    }

    fn load(&self, path: &Path) -> Option<SessionHistory> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                log::warn!("failed to read session {}: {e}", path.display());
                return None;
            }
        };
        match serde_json::from_str::<SessionHistory>(&text) {
            Ok(history) if !history.idle_since(self.cutoff(Utc::now())) => Some(history),
            Ok(_) => {
                log::debug!("session {} expired", path.display());
                None
            }
            Err(e) => {
                log::warn!("ignoring corrupt session {}: {e}", path.display());
                None
            }
        }
    }

    fn path_for(&self, session_id: &str) -> Option<PathBuf> {
        let dir = self.dir.as_ref()?;
        let digest = hex::encode(Sha256::digest(session_id.as_bytes()));
        Some(dir.join(format!("{FILE_PREFIX}{}{FILE_SUFFIX}", &digest[..32])))
    }

    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let ttl = TimeDelta::from_std(self.idle_ttl).unwrap_or(TimeDelta::MAX);
        now.checked_sub_signed(ttl).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Drop sessions idle past the TTL and reset the anonymous session's peak.
    ///
    /// The anonymous history is shared by unrelated callers, so escalation
    /// it accumulated must not outlive the commands that caused it.
    /// Returns how many sessions and files were removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let cutoff = self.cutoff(now);
        let mut removed = {
            let mut sessions = self.sessions.lock();
            let before = sessions.len();
            sessions.retain(|_, h| !h.idle_since(cutoff));
            if let Some(anonymous) = sessions.get_mut(ANONYMOUS_SESSION) {
                anonymous.reset_peak();
            }
            before - sessions.len()
        };
        if let Some(dir) = &self.dir {
            match remove_stale_files(dir, cutoff) {
                Ok(n) => removed += n,
                Err(e) => log::warn!("session cleanup in {} failed: {e}", dir.display()),
            }
        }
        if removed > 0 {
            log::info!("expired {removed} idle sessions");
        }
        removed
    }

    /// Sessions currently held in memory.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    #[cfg(test)]
    fn touch(&self, session_id: Option<&str>, at: DateTime<Utc>) {
        self.update(session_id, |h| h.set_last_seen(at));
    }
}

fn save(path: &Path, history: &SessionHistory) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec(history)?)?;
    fs::rename(&tmp, path)
}

/// Delete session files last modified before `cutoff`.
fn remove_stale_files(dir: &Path, cutoff: DateTime<Utc>) -> io::Result<usize> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let cutoff = SystemTime::from(cutoff);
    let mut removed = 0;
    for entry in entries.filter_map(|e| e.ok()) {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !(name.starts_with(FILE_PREFIX) && name.ends_with(FILE_SUFFIX)) {
            continue;
        }
        let stale = entry
            .metadata()
            .and_then(|m| m.modified())
            .is_ok_and(|modified| modified < cutoff);
        if stale && fs::remove_file(entry.path()).is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}
