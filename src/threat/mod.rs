//! Threat Intelligence Engine.
//!
//! Scores a command against a registry of indicators. Reports are cached per
//! `(command, args)` for a fixed TTL so repeated scoring inside the window is
//! idempotent: the same report, timestamp included, comes back unchanged.
//! Critical scores are written to the audit log as security violations.

pub mod indicator;
pub mod report;
pub mod workflow;

pub use indicator::{
    FalsePositiveReport, IndicatorInput, IndicatorKind, Severity, ThreatIndicator,
    seed_indicators,
};
pub use report::{IndicatorMatch, ThreatReport};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::time::Instant;

use crate::audit::{AuditEvent, AuditLogger, EventType};
use crate::config::ThreatConfig;
use crate::error::ThreatError;
use crate::parse::command_line;
use crate::verdict::RiskLevel;

struct CachedReport {
    report: ThreatReport,
    stored_at: Instant,
}

/// Registry snapshot for monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct ThreatStatistics {
    pub total_indicators: usize,
    pub by_kind: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<String, usize>,
    pub cache_size: usize,
    pub false_positive_reports: usize,
    /// `(indicator id, match count)`, most frequent first.
    pub top_matched: Vec<(String, u64)>,
}

pub struct ThreatEngine {
    indicators: RwLock<Vec<ThreatIndicator>>,
    cache: Mutex<HashMap<String, CachedReport>>,
    hits: Mutex<HashMap<String, u64>>,
    next_custom: AtomicU64,
    ttl: Duration,
    critical_threshold: f64,
    audit: Option<Arc<AuditLogger>>,
}

impl ThreatEngine {
    /// Engine seeded with the built-in indicators.
    pub fn new(ttl: Duration, critical_threshold: f64) -> Self {
        let indicators = seed_indicators()
            .into_iter()
            .enumerate()
            .filter_map(|(i, input)| {
                let id = format!("builtin-{:03}", i + 1);
                match ThreatIndicator::compile(id.clone(), input) {
                    Ok(ind) => Some(ind),
                    Err(e) => {
                        log::error!("skipping built-in indicator {id}: {e}");
                        None
                    }
                }
            })
            .collect();

        Self {
            indicators: RwLock::new(indicators),
            cache: Mutex::new(HashMap::new()),
            hits: Mutex::new(HashMap::new()),
            next_custom: AtomicU64::new(1),
            ttl,
            critical_threshold,
            audit: None,
        }
    }

    /// Engine from configuration; configured custom indicators are added on top
    /// of the seed set, and any that fail to compile are logged and skipped.
    pub fn from_config(config: &ThreatConfig) -> Self {
        let engine = Self::new(config.cache_ttl(), config.critical_threshold);
        for input in &config.indicators {
            if let Err(e) = engine.add_custom_indicator(input.clone()) {
                log::warn!("ignoring configured indicator {:?}: {e}", input.indicator);
            }
        }
        engine
    }

    /// Report critical scores to this audit log.
    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn critical_threshold(&self) -> f64 {
        self.critical_threshold
    }

    /// Score a command against every registered indicator.
    pub fn analyze_command(&self, command: &str, args: &[String]) -> ThreatReport {
        let key = cache_key(command, args);
        {
            let cache = self.cache.lock();
            if let Some(cached) = cache.get(&key)
                && cached.stored_at.elapsed() < self.ttl
            {
                return cached.report.clone();
            }
        }

        let line = command_line(command, args);
        let (matches, weights, mitigations) = {
            let indicators = self.indicators.read();
            let mut matches = Vec::new();
            let mut weights = Vec::new();
            let mut mitigations: Vec<String> = Vec::new();
            for ind in indicators.iter() {
                if let Some(matched) = ind.find_match(command, args, &line) {
                    weights.push(ind.effective_weight());
                    mitigations.extend(ind.mitigations.iter().cloned());
                    matches.push(IndicatorMatch::new(ind, matched));
                }
            }
            (matches, weights, mitigations)
        };

        {
            let mut hits = self.hits.lock();
            for m in &matches {
                *hits.entry(m.indicator_id.clone()).or_default() += 1;
            }
        }

        let risk_score = report::combine_scores(weights);
        let mitigation_refs: Vec<&str> = mitigations.iter().map(String::as_str).collect();
        let report = ThreatReport {
            recommendations: report::recommendations(risk_score, &mitigation_refs),
            matches,
            risk_score,
            timestamp: Utc::now(),
        };

        if risk_score >= self.critical_threshold {
            self.report_violation(command, args, &report);
        }

        self.cache.lock().insert(
            key,
            CachedReport {
                report: report.clone(),
                stored_at: Instant::now(),
            },
        );
        report
    }

    fn report_violation(&self, command: &str, args: &[String], report: &ThreatReport) {
        let Some(audit) = &self.audit else {
            return;
        };
        let ids: Vec<&str> = report
            .matches
            .iter()
            .map(|m| m.indicator_id.as_str())
            .collect();
        let event = AuditEvent::new(EventType::SecurityViolation)
            .command(command)
            .args(args.to_vec())
            .risk_level(RiskLevel::Critical)
            .metadata(serde_json::json!({
                "source": "threat_engine",
                "riskScore": report.risk_score,
                "indicators": ids,
            }));
        if let Err(e) = audit.log(event) {
            log::error!("failed to record security violation: {e}");
        }
    }

    /// Register a new indicator and return its id.
    pub fn add_custom_indicator(&self, input: IndicatorInput) -> Result<String, ThreatError> {
        let n = self.next_custom.fetch_add(1, Ordering::Relaxed);
        let id = format!("custom-{n:03}");
        let indicator = ThreatIndicator::compile(id.clone(), input)?;
        self.indicators.write().push(indicator);
        self.cache.lock().clear();
        log::info!("added threat indicator {id}");
        Ok(id)
    }

    /// Remove an indicator. Returns whether it existed.
    pub fn remove_indicator(&self, id: &str) -> bool {
        let mut indicators = self.indicators.write();
        let before = indicators.len();
        indicators.retain(|i| i.id != id);
        let removed = indicators.len() != before;
        if removed {
            self.cache.lock().clear();
        }
        removed
    }

    /// Annotate an indicator as having fired on benign input.
    pub fn report_false_positive(&self, id: &str, context: &str) -> Result<(), ThreatError> {
        let mut indicators = self.indicators.write();
        let indicator = indicators
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| ThreatError::UnknownIndicator(id.to_string()))?;
        indicator.false_positives.push(FalsePositiveReport {
            context: context.to_string(),
            reported_at: Utc::now(),
        });
        log::info!(
            "false positive reported for {id} (confidence now {:.2})",
            indicator.confidence()
        );
        drop(indicators);
        self.cache.lock().clear();
        Ok(())
    }

    pub fn indicator(&self, id: &str) -> Option<ThreatIndicator> {
        self.indicators.read().iter().find(|i| i.id == id).cloned()
    }

    /// Drop cache entries older than the TTL. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut cache = self.cache.lock();
        let before = cache.len();
        cache.retain(|_, c| c.stored_at.elapsed() < self.ttl);
        before - cache.len()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn statistics(&self) -> ThreatStatistics {
        let indicators = self.indicators.read();
        let mut by_kind = BTreeMap::new();
        let mut by_severity = BTreeMap::new();
        let mut false_positive_reports = 0;
        for ind in indicators.iter() {
            *by_kind.entry(ind.kind.as_str().to_string()).or_insert(0) += 1;
            *by_severity
                .entry(ind.severity.as_str().to_string())
                .or_insert(0) += 1;
            false_positive_reports += ind.false_positives.len();
        }

        let mut top_matched: Vec<(String, u64)> = self
            .hits
            .lock()
            .iter()
            .map(|(id, n)| (id.clone(), *n))
            .collect();
        top_matched.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top_matched.truncate(10);

        ThreatStatistics {
            total_indicators: indicators.len(),
            by_kind,
            by_severity,
            cache_size: self.cache_len(),
            false_positive_reports,
            top_matched,
        }
    }
}

/// Order-preserving key; argument order changes meaning.
fn cache_key(command: &str, args: &[String]) -> String {
    let mut key = command.to_string();
    for arg in args {
        key.push('\u{1f}');
        key.push_str(arg);
    }
    key
}
