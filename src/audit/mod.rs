//! Secure Audit Logger.
//!
//! Every gate decision becomes one JSON line. `command` and each argument are
//! encrypted per field, and every entry carries an HMAC over all its other
//! fields. Entries are queued by [`AuditLogger::log`] and written by
//! [`AuditLogger::flush`], normally from a periodic task. Flush and rotation
//! share one busy flag: a tick that finds the other running skips, and a
//! failed write puts the batch back at the front of the queue.
//!
//! Keys are derived per process and never written to disk, so only the
//! process that wrote an entry can decrypt or verify it.

pub mod archive;
pub mod crypto;
pub mod entry;
pub mod query;
pub mod verify;

pub use crypto::{AuditKeys, DECRYPTION_FAILED};
pub use entry::{AuditEntry, AuditEvent, EncryptedField, EntryContext, EventType};
pub use query::{ExportFormat, SearchCriteria};
pub use verify::{FailureKind, LineFailure, VerifyReport};

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AuditConfig;
use crate::error::AuditError;
use crate::notify::{Alert, AlertKind, NotificationSink};

/// Clears the busy flag on every exit path.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct AuditLogger {
    config: AuditConfig,
    dir: PathBuf,
    log_path: PathBuf,
    keys: AuditKeys,
    queue: Mutex<VecDeque<AuditEntry>>,
    busy: AtomicBool,
    sinks: Vec<Arc<dyn NotificationSink>>,
    alerts: Mutex<Vec<JoinHandle<()>>>,
}

impl AuditLogger {
    /// Derive keys and prepare the log directory.
    pub fn open(config: AuditConfig) -> Result<Self, AuditError> {
        let dir = config.dir_path();
        fs::create_dir_all(&dir)?;
        if !dir.is_dir() {
            return Err(AuditError::Directory(dir));
        }
        let log_path = config.log_path();
        let keys = AuditKeys::derive(config.kdf_iterations)?;
        let sinks = crate::notify::sinks_from_config(&config);
        log::info!("audit log at {}", log_path.display());

        Ok(Self {
            config,
            dir,
            log_path,
            keys,
            queue: Mutex::new(VecDeque::new()),
            busy: AtomicBool::new(false),
            sinks,
            alerts: Mutex::new(Vec::new()),
        })
    }

    /// Replace the alert sinks chosen from configuration.
    pub fn with_sinks(mut self, sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        self.sinks = sinks;
        self
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Entries queued but not yet written.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Seal an event into an entry and queue it. Returns the event id.
    pub fn log(&self, event: AuditEvent) -> Result<String, AuditError> {
        let alerting = event.is_alerting();
        let entry = self.seal(event)?;
        let event_id = entry.event_id.clone();

        if alerting {
            let kind = if entry.event_type == EventType::SecurityViolation {
                AlertKind::SecurityViolation
            } else {
                AlertKind::CriticalEvent
            };
            let mut alert = Alert::new(
                kind,
                format!(
                    "{} event by {} (risk {})",
                    entry.event_type.as_str(),
                    entry.user,
                    entry.risk_level.map(|r| r.as_str()).unwrap_or("n/a")
                ),
            );
            alert.event_id = Some(event_id.clone());
            alert.risk_level = entry.risk_level;
            self.alert(alert);
        }

        self.queue.lock().push_back(entry);
        Ok(event_id)
    }

    fn seal(&self, event: AuditEvent) -> Result<AuditEntry, AuditError> {
        let command = event
            .command
            .as_deref()
            .map(|c| self.keys.encrypt(c))
            .transpose()?;
        let args = event
            .args
            .as_ref()
            .map(|args| {
                args.iter()
                    .map(|a| self.keys.encrypt(a))
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?;

        let mut entry = AuditEntry {
            timestamp: Utc::now(),
            event_id: uuid::Uuid::new_v4().to_string(),
            event_type: event.event_type,
            user: event.user.unwrap_or_else(entry::current_user),
            command,
            args,
            verdict: event.verdict,
            risk_level: event.risk_level,
            context: EntryContext::capture(),
            metadata: event.metadata,
            integrity_hash: String::new(),
        };
        entry.integrity_hash = self.hash_entry(&entry)?;
        Ok(entry)
    }

    /// HMAC over the entry's JSON with the hash field removed.
    fn hash_entry(&self, entry: &AuditEntry) -> Result<String, AuditError> {
        let mut value = serde_json::to_value(entry)?;
        if let Some(object) = value.as_object_mut() {
            object.remove(entry::HASH_FIELD);
        }
        Ok(self.keys.sign(&serde_json::to_vec(&value)?))
    }

    /// Fire-and-forget delivery to every sink; failures are only logged.
    fn alert(&self, alert: Alert) {
        log::warn!("audit alert: {}", alert.message);
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            log::warn!("no async runtime; alert not delivered to sinks");
            return;
        };
        let mut pending = self.alerts.lock();
        pending.retain(|h| !h.is_finished());
        for sink in &self.sinks {
            let sink = Arc::clone(sink);
            let alert = alert.clone();
            pending.push(handle.spawn(async move {
                if let Err(e) = sink.send(&alert).await {
                    log::error!("alert delivery via {} failed: {e}", sink.name());
                }
            }));
        }
    }

    fn try_acquire(&self) -> Option<BusyGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard(&self.busy))
    }

    /// Write every queued entry. Returns how many were written; 0 when
    /// another flush or a rotation is in progress.
    pub fn flush(&self) -> Result<usize, AuditError> {
        let (written, size) = {
            let Some(_guard) = self.try_acquire() else {
                log::debug!("audit flush skipped: busy");
                return Ok(0);
            };
            let written = self.write_queue()?;
            let size = fs::metadata(&self.log_path).map(|m| m.len()).unwrap_or(0);
            (written, size)
        };

        if size > self.config.max_file_bytes
            && let Err(e) = self.rotate()
        {
            log::error!("audit rotation failed, active log left in place: {e}");
        }
        Ok(written)
    }

    /// Drain the queue into the active log. Caller holds the busy flag.
    fn write_queue(&self) -> Result<usize, AuditError> {
        let batch: Vec<AuditEntry> = self.queue.lock().drain(..).collect();
        if batch.is_empty() {
            return Ok(0);
        }
        match self.append(&batch) {
            Ok(()) => Ok(batch.len()),
            Err(e) => {
                log::warn!("audit write failed, requeueing {} entries: {e}", batch.len());
                let mut queue = self.queue.lock();
                for entry in batch.into_iter().rev() {
                    queue.push_front(entry);
                }
                Err(e)
            }
        }
    }

    fn append(&self, batch: &[AuditEntry]) -> Result<(), AuditError> {
        let mut buf = Vec::new();
        for entry in batch {
            serde_json::to_writer(&mut buf, entry)?;
            buf.push(b'\n');
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        file.write_all(&buf)?;
        file.flush()?;
        Ok(())
    }

    /// Archive the active log and start a new one.
    ///
    /// Queued entries are written first. The active log is truncated only
    /// after the archive is complete. Returns `false` when skipped because a
    /// flush is running.
    pub fn rotate(&self) -> Result<bool, AuditError> {
        let Some(_guard) = self.try_acquire() else {
            log::debug!("audit rotation skipped: busy");
            return Ok(false);
        };
        self.write_queue()?;

        if !self.log_path.exists() {
            return Ok(true);
        }
        let archive = archive::compress(&self.log_path, &self.dir, Utc::now())?;
        File::create(&self.log_path)?;
        let pruned = archive::prune(&self.dir, self.config.max_archives)?;
        log::info!(
            "rotated audit log to {} ({} old archives pruned)",
            archive.display(),
            pruned.len()
        );
        Ok(true)
    }

    /// Recompute every entry's hash in `path` and report the failures.
    /// Any failure raises an integrity alert.
    pub fn verify(&self, path: &Path) -> Result<VerifyReport, AuditError> {
        let reader = BufReader::new(File::open(path)?);
        let (total, failures) = verify::verify_lines(reader, &self.keys)?;
        let report = VerifyReport {
            path: path.to_path_buf(),
            total_lines: total,
            valid_lines: total - failures.len(),
            failures,
        };
        if !report.is_clean() {
            self.alert(Alert::new(
                AlertKind::IntegrityFailure,
                format!(
                    "integrity check failed for {} on lines {:?}",
                    path.display(),
                    report.failed_lines()
                ),
            ));
        }
        Ok(report)
    }

    /// Plaintext of one field, or [`DECRYPTION_FAILED`].
    pub fn decrypt_field(&self, field: &EncryptedField) -> String {
        self.keys.decrypt_or_sentinel(field)
    }

    /// `(command, args)` of an entry, decrypted field by field.
    pub fn decrypt_entry(&self, entry: &AuditEntry) -> (Option<String>, Option<Vec<String>>) {
        let command = entry.command.as_ref().map(|c| self.decrypt_field(c));
        let args = entry
            .args
            .as_ref()
            .map(|args| args.iter().map(|a| self.decrypt_field(a)).collect());
        (command, args)
    }

    /// Linear scan over the active log, and over archives when the query is
    /// time-bounded. Unparseable lines are skipped.
    pub fn search(&self, criteria: &SearchCriteria) -> Result<Vec<AuditEntry>, AuditError> {
        let mut lines = Vec::new();
        if criteria.is_time_bounded() {
            for path in archive::list_archives(&self.dir)? {
                let rotated = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .and_then(archive::archive_time);
                if rotated.is_some_and(|t| criteria.may_contain(t)) {
                    lines.extend(archive::read_lines(&path)?);
                }
            }
        }
        if self.log_path.exists() {
            let reader = BufReader::new(File::open(&self.log_path)?);
            for line in reader.lines() {
                lines.push(line?);
            }
        }

        let mut found = Vec::new();
        for line in lines.iter().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<AuditEntry>(line) {
                Ok(entry) if criteria.matches(&entry) => found.push(entry),
                Ok(_) => {}
                Err(e) => log::debug!("skipping unparseable audit line: {e}"),
            }
        }
        Ok(found)
    }

    /// Write every entry of the active log to `path`. Returns the count.
    pub fn export(&self, path: &Path, format: ExportFormat) -> Result<usize, AuditError> {
        let entries = self.search(&SearchCriteria::default())?;
        let mut out = BufWriter::new(File::create(path)?);
        match format {
            ExportFormat::Jsonl => {
                for entry in &entries {
                    serde_json::to_writer(&mut out, entry)?;
                    out.write_all(b"\n")?;
                }
            }
            ExportFormat::Csv => {
                writeln!(out, "{}", query::CSV_HEADER)?;
                for entry in &entries {
                    writeln!(out, "{}", query::csv_row(entry, &self.keys))?;
                }
            }
        }
        out.flush()?;
        Ok(entries.len())
    }

    /// Flush on a fixed period until `cancel` fires.
    pub fn spawn_flusher(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let logger = Arc::clone(self);
        crate::scheduler::spawn_periodic(
            "audit-flush",
            self.config.flush_interval(),
            cancel,
            move || {
                let logger = Arc::clone(&logger);
                async move {
                    if let Err(e) = logger.flush() {
                        log::warn!("audit flush failed, will retry: {e}");
                    }
                }
            },
        )
    }

    /// Final flush, then wait for in-flight alerts.
    pub async fn shutdown(&self) -> Result<(), AuditError> {
        while self.pending() > 0 {
            if self.flush()? == 0 {
                tokio::task::yield_now().await;
            }
        }
        let alerts: Vec<JoinHandle<()>> = std::mem::take(&mut *self.alerts.lock());
        for handle in alerts {
            let _ = handle.await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NotifyError;
    use crate::verdict::{RiskLevel, Verdict};
    use async_trait::async_trait;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Alert>>);

    #[async_trait]
    impl NotificationSink for Recorder {
        async fn send(&self, alert: &Alert) -> Result<(), NotifyError> {
            self.0.lock().push(alert.clone());
            Ok(())
        }

        fn name(&self) -> &str {
            "recorder"
        }
    }

    fn open(dir: &TempDir) -> AuditLogger {
        let config = AuditConfig {
            kdf_iterations: 10,
            console_alerts: false,
            ..AuditConfig::in_dir(dir.path())
        };
        AuditLogger::open(config).unwrap()
    }

    fn command_event(cmd: &str) -> AuditEvent {
        AuditEvent::new(EventType::CommandExecution)
            .user("tester")
            .command(cmd)
            .args(vec!["-la".into(), "/srv/private".into()])
            .verdict(Verdict::Allow)
            .risk_level(RiskLevel::Low)
    }

    #[test]
    fn log_then_flush_writes_encrypted_lines() {
        let dir = TempDir::new().unwrap();
        let logger = open(&dir);
        logger.log(command_event("ls")).unwrap();
        logger.log(command_event("pwd")).unwrap();
        assert_eq!(logger.pending(), 2);

        assert_eq!(logger.flush().unwrap(), 2);
        assert_eq!(logger.pending(), 0);

        let text = fs::read_to_string(logger.log_path()).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(!text.contains("/srv/private"));
        assert!(text.contains("\"integrityHash\""));

        let entries = logger.search(&SearchCriteria::default()).unwrap();
        assert_eq!(entries.len(), 2);
        let (cmd, args) = logger.decrypt_entry(&entries[0]);
        assert_eq!(cmd.as_deref(), Some("ls"));
        assert_eq!(args.unwrap(), vec!["-la", "/srv/private"]);
    }

    #[test]
    fn entries_are_written_in_enqueue_order() {
        let dir = TempDir::new().unwrap();
        let logger = open(&dir);
        let ids: Vec<String> = (0..5)
            .map(|i| logger.log(command_event(&format!("cmd{i}"))).unwrap())
            .collect();
        logger.flush().unwrap();
        let found: Vec<String> = logger
            .search(&SearchCriteria::default())
            .unwrap()
            .into_iter()
            .map(|e| e.event_id)
            .collect();
        assert_eq!(found, ids);
    }

    #[test]
    fn verify_reports_exactly_the_tampered_line() {
        let dir = TempDir::new().unwrap();
        let logger = open(&dir);
        for i in 0..3 {
            logger.log(command_event(&format!("cmd{i}"))).unwrap();
        }
        logger.flush().unwrap();
        assert!(logger.verify(logger.log_path()).unwrap().is_clean());

        let text = fs::read_to_string(logger.log_path()).unwrap();
        let mut lines: Vec<String> = text.lines().map(String::from).collect();
        let last = lines[1].rfind('"').unwrap();
        let hash_start = lines[1][..last].rfind('"').unwrap() + 1;
        let mut tampered = lines[1].clone();
        tampered.replace_range(hash_start..hash_start + 1, "x");
        lines[1] = tampered;
        fs::write(logger.log_path(), lines.join("\n") + "\n").unwrap();

        let report = logger.verify(logger.log_path()).unwrap();
        assert_eq!(report.failed_lines(), vec![2]);
        assert_eq!(report.failures[0].kind, FailureKind::HashMismatch);
        assert_eq!(report.valid_lines, 2);
    }

    #[test]
    fn float_metadata_verifies_clean() {
        let dir = TempDir::new().unwrap();
        let logger = open(&dir);
        let scores = [
            0.9510000000000001,
            0.43300000000000005,
            1.0 - (1.0 - 0.3 * 0.7) * (1.0 - 0.45 * 0.9),
            0.1 + 0.2,
            1.0 / 3.0,
        ];
        for score in scores {
            logger
                .log(command_event("rm").metadata(serde_json::json!({ "riskScore": score })))
                .unwrap();
        }
        logger.flush().unwrap();

        let report = logger.verify(logger.log_path()).unwrap();
        assert!(report.is_clean(), "{report:?}");
        assert_eq!(report.valid_lines, scores.len());
    }

    #[test]
    fn verify_flags_altered_user() {
        let dir = TempDir::new().unwrap();
        let logger = open(&dir);
        logger.log(command_event("ls")).unwrap();
        logger.flush().unwrap();
        let text = fs::read_to_string(logger.log_path()).unwrap();
        fs::write(logger.log_path(), text.replace("tester", "someone")).unwrap();
        assert_eq!(
            logger.verify(logger.log_path()).unwrap().failed_lines(),
            vec![1]
        );
    }

    #[test]
    fn decrypt_failure_is_a_sentinel() {
        let dir = TempDir::new().unwrap();
        let logger = open(&dir);
        let field = EncryptedField {
            data: "AAAA".into(),
            iv: "AAAAAAAAAAAAAAAA".into(),
            tag: "AAAAAAAAAAAAAAAAAAAAAA==".into(),
        };
        assert_eq!(logger.decrypt_field(&field), DECRYPTION_FAILED);
    }

    #[test]
    fn failed_write_requeues_at_front() {
        let dir = TempDir::new().unwrap();
        let logger = open(&dir);
        // A directory where the log file should be makes the append fail.
        fs::create_dir_all(logger.log_path()).unwrap();

        let first = logger.log(command_event("a")).unwrap();
        logger.log(command_event("b")).unwrap();
        assert!(logger.flush().is_err());
        assert_eq!(logger.pending(), 2);
        assert_eq!(logger.queue.lock().front().unwrap().event_id, first);

        fs::remove_dir(logger.log_path()).unwrap();
        assert_eq!(logger.flush().unwrap(), 2);
        assert_eq!(logger.pending(), 0);
    }

    #[test]
    fn flush_skips_while_busy() {
        let dir = TempDir::new().unwrap();
        let logger = open(&dir);
        logger.log(command_event("ls")).unwrap();
        let guard = logger.try_acquire().unwrap();
        assert_eq!(logger.flush().unwrap(), 0);
        assert!(!logger.rotate().unwrap());
        drop(guard);
        assert_eq!(logger.flush().unwrap(), 1);
    }

    #[test]
    fn rotation_archives_truncates_and_prunes() {
        let dir = TempDir::new().unwrap();
        let config = AuditConfig {
            kdf_iterations: 10,
            console_alerts: false,
            max_file_bytes: 1,
            max_archives: 2,
            ..AuditConfig::in_dir(dir.path())
        };
        let logger = AuditLogger::open(config).unwrap();

        for i in 0..4 {
            logger.log(command_event(&format!("cmd{i}"))).unwrap();
            logger.flush().unwrap();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        let archives = archive::list_archives(dir.path()).unwrap();
        assert_eq!(archives.len(), 2);
        assert_eq!(fs::metadata(logger.log_path()).unwrap().len(), 0);
        let archived = archive::read_lines(&archives[1]).unwrap();
        assert_eq!(archived.len(), 1);
        assert_eq!(verify::check_line(&archived[0], &logger.keys), None);
    }

    #[test]
    fn time_bounded_search_reads_archives() {
        let dir = TempDir::new().unwrap();
        let logger = open(&dir);
        let start = Utc::now() - chrono::Duration::minutes(1);
        logger.log(command_event("old")).unwrap();
        logger.flush().unwrap();
        assert!(logger.rotate().unwrap());
        logger
            .log(AuditEvent::new(EventType::SystemEvent).user("tester"))
            .unwrap();
        logger.flush().unwrap();

        assert_eq!(logger.search(&SearchCriteria::default()).unwrap().len(), 1);
        let bounded = SearchCriteria {
            start: Some(start),
            ..Default::default()
        };
        assert_eq!(logger.search(&bounded).unwrap().len(), 2);
        let only_system = SearchCriteria {
            start: Some(start),
            event_type: Some(EventType::SystemEvent),
            ..Default::default()
        };
        assert_eq!(logger.search(&only_system).unwrap().len(), 1);
    }

    #[test]
    fn export_formats() {
        let dir = TempDir::new().unwrap();
        let logger = open(&dir);
        logger.log(command_event("echo")).unwrap();
        logger.flush().unwrap();

        let jsonl = dir.path().join("out.jsonl");
        assert_eq!(logger.export(&jsonl, ExportFormat::Jsonl).unwrap(), 1);
        let line = fs::read_to_string(&jsonl).unwrap();
        let entry: AuditEntry = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(entry.user, "tester");

        let csv = dir.path().join("out.csv");
        logger.export(&csv, ExportFormat::Csv).unwrap();
        let text = fs::read_to_string(&csv).unwrap();
        let mut rows = text.lines();
        assert_eq!(rows.next(), Some(query::CSV_HEADER));
        assert!(rows.next().unwrap().contains(",echo,-la /srv/private,"));
    }

    #[tokio::test]
    async fn critical_events_alert_without_blocking_the_write() {
        let dir = TempDir::new().unwrap();
        let recorder = Arc::new(Recorder::default());
        let logger = open(&dir).with_sinks(vec![recorder.clone() as Arc<dyn NotificationSink>]);

        logger.log(command_event("ls")).unwrap();
        logger
            .log(command_event("dd").risk_level(RiskLevel::Critical))
            .unwrap();
        logger
            .log(AuditEvent::new(EventType::SecurityViolation).user("tester"))
            .unwrap();
        logger.shutdown().await.unwrap();

        let alerts = recorder.0.lock();
        assert_eq!(alerts.len(), 2);
        assert!(alerts.iter().any(|a| a.kind == AlertKind::CriticalEvent));
        assert!(alerts.iter().any(|a| a.kind == AlertKind::SecurityViolation));
        assert_eq!(logger.search(&SearchCriteria::default()).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn integrity_failure_alerts() {
        let dir = TempDir::new().unwrap();
        let recorder = Arc::new(Recorder::default());
        let logger = open(&dir).with_sinks(vec![recorder.clone() as Arc<dyn NotificationSink>]);
        fs::write(dir.path().join("bad.log"), "garbage\n").unwrap();
        let report = logger.verify(&dir.path().join("bad.log")).unwrap();
        assert_eq!(report.failed_lines(), vec![1]);
        logger.shutdown().await.unwrap();
        assert_eq!(recorder.0.lock()[0].kind, AlertKind::IntegrityFailure);
    }

    #[tokio::test(start_paused = true)]
    async fn background_flusher_writes_queue() {
        let dir = TempDir::new().unwrap();
        let logger = Arc::new(open(&dir));
        let cancel = CancellationToken::new();
        let task = logger.spawn_flusher(cancel.clone());

        logger.log(command_event("ls")).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
        assert_eq!(logger.pending(), 0);

        cancel.cancel();
        task.await.unwrap();
    }
}
