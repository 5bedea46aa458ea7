use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::indicator::{IndicatorKind, Severity, ThreatIndicator};

/// Score above which the command should be blocked.
pub const BLOCK_BAND: f64 = 0.7;
/// Score from which the command earns a warning.
pub const WARN_BAND: f64 = 0.4;

/// One indicator that fired, with the text it fired on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorMatch {
    pub indicator_id: String,
    pub kind: IndicatorKind,
    pub severity: Severity,
    pub description: String,
    pub matched_substring: String,
}

impl IndicatorMatch {
    pub fn new(indicator: &ThreatIndicator, matched: String) -> Self {
        Self {
            indicator_id: indicator.id.clone(),
            kind: indicator.kind,
            severity: indicator.severity,
            description: indicator.description.clone(),
            matched_substring: matched,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreatReport {
    pub matches: Vec<IndicatorMatch>,
    pub risk_score: f64,
    pub recommendations: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl ThreatReport {
    pub fn highest_severity(&self) -> Option<Severity> {
        self.matches.iter().map(|m| m.severity).max()
    }

    pub fn is_clean(&self) -> bool {
        self.matches.is_empty()
    }
}

/// Combine independent match weights into one bounded score.
///
/// `1 - Π(1 - wᵢ)`: monotonic in every weight, capped at 1.0, and two
/// medium matches always outscore one.
pub fn combine_scores(weights: impl IntoIterator<Item = f64>) -> f64 {
    let miss: f64 = weights
        .into_iter()
        .map(|w| 1.0 - w.clamp(0.0, 1.0))
        .product();
    (1.0 - miss).clamp(0.0, 1.0)
}

/// Banded advice followed by each matched indicator's mitigations.
pub fn recommendations(score: f64, mitigations: &[&str]) -> Vec<String> {
    let mut out = Vec::new();
    if score > BLOCK_BAND {
        out.push("BLOCK: high-risk command, do not execute without explicit review".to_string());
        out.push("Notify security team".to_string());
    } else if score >= WARN_BAND {
        out.push("WARNING: review this command carefully before execution".to_string());
    } else if score > 0.0 {
        out.push("CAUTION: low-risk indicators matched, proceed with care".to_string());
    }
    for m in mitigations {
        if !out.iter().any(|existing| existing == m) {
            out.push(m.to_string());
        }
    }
    out
}
