//! Session workflow patterns.
//!
//! Individually moderate commands can add up to a destructive sequence
//! (`git reset --hard` then `git push --force`). A [`SessionHistory`] keeps
//! the last few commands of one session and matches ordered patterns over
//! that window.

use std::collections::{BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::verdict::RiskLevel;

/// Prior commands kept per session; the current one makes the window.
pub const DEFAULT_WINDOW: usize = 3;

const ESCALATE_HIGH_AFTER: usize = 3;
const ESCALATE_CRITICAL_AFTER: usize = 5;

/// An ordered sequence of substrings that must appear in consecutive-or-later
/// commands.
#[derive(Debug, Clone, Copy)]
pub struct WorkflowPattern {
    pub name: &'static str,
    pub steps: &'static [&'static str],
    pub risk: RiskLevel,
    pub description: &'static str,
}

pub const PATTERNS: &[WorkflowPattern] = &[
    WorkflowPattern {
        name: "REPO_WIPE",
        steps: &["git rm", "git push --force"],
        risk: RiskLevel::Critical,
        description: "files removed from git and force pushed",
    },
    WorkflowPattern {
        name: "REPO_WIPE",
        steps: &["rm -rf", "git add", "git push --force"],
        risk: RiskLevel::Critical,
        description: "working tree deleted, staged, and force pushed",
    },
    WorkflowPattern {
        name: "MASS_DELETE",
        steps: &["rm -rf", "rm -rf", "rm -rf"],
        risk: RiskLevel::High,
        description: "repeated recursive deletions",
    },
    WorkflowPattern {
        name: "HISTORY_REWRITE",
        steps: &["git reset --hard", "git push --force"],
        risk: RiskLevel::Critical,
        description: "history reset and force pushed",
    },
    WorkflowPattern {
        name: "HISTORY_REWRITE",
        steps: &["git rebase", "git push --force"],
        risk: RiskLevel::Critical,
        description: "history rebased and force pushed",
    },
    WorkflowPattern {
        name: "UNCOMMITTED_RISK",
        steps: &["git stash", "git checkout", "rm"],
        risk: RiskLevel::High,
        description: "stashed work followed by branch switch and deletion",
    },
    WorkflowPattern {
        name: "TEMP_SWAP",
        steps: &["cp", "rm -rf", "cp"],
        risk: RiskLevel::High,
        description: "copy, delete, copy back swap",
    },
    WorkflowPattern {
        name: "ENV_DESTRUCTION",
        steps: &["unset", "rm .env"],
        risk: RiskLevel::High,
        description: "environment cleared and .env removed",
    },
];

impl WorkflowPattern {
    /// Whether the steps appear in order across `lines`, one step per line.
    fn matches(&self, lines: &[String]) -> bool {
        let mut steps = self.steps.iter().peekable();
        for line in lines {
            let Some(step) = steps.peek() else { break };
            if line.contains(&step.to_ascii_lowercase()) {
                steps.next();
            }
        }
        steps.peek().is_none()
    }
}

/// A pattern that fired for the current command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowMatch {
    pub name: &'static str,
    pub risk: RiskLevel,
    pub description: &'static str,
}

/// What recording one command concluded about the session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionAssessment {
    pub cumulative_risk: RiskLevel,
    pub patterns: Vec<WorkflowMatch>,
    pub high_risk_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Recorded {
    line: String,
    risk: RiskLevel,
}

/// Paths remembered per session as possibly affected.
const MAX_FILES_AT_RISK: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHistory {
    window: usize,
    recent: VecDeque<Recorded>,
    peak: RiskLevel,
    high_risk_count: usize,
    #[serde(default)]
    files_at_risk: Vec<String>,
    #[serde(default)]
    shown_warnings: BTreeSet<String>,
    last_seen: DateTime<Utc>,
}

impl Default for SessionHistory {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl SessionHistory {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            recent: VecDeque::with_capacity(window + 1),
            peak: RiskLevel::Low,
            high_risk_count: 0,
            files_at_risk: Vec::new(),
            shown_warnings: BTreeSet::new(),
            last_seen: Utc::now(),
        }
    }

    /// Record a command and its own risk; returns the session-level view.
    pub fn record(&mut self, line: &str, risk: RiskLevel) -> SessionAssessment {
        self.last_seen = Utc::now();
        self.recent.push_back(Recorded {
            line: line.to_ascii_lowercase(),
            risk,
        });
        while self.recent.len() > self.window + 1 {
            self.recent.pop_front();
        }
        if risk >= RiskLevel::High {
            self.high_risk_count += 1;
        }
        self.peak = self.peak.max(risk);

        let lines: Vec<String> = self.recent.iter().map(|r| r.line.clone()).collect();
        let patterns: Vec<WorkflowMatch> = PATTERNS
            .iter()
            .filter(|p| p.matches(&lines))
            .map(|p| WorkflowMatch {
                name: p.name,
                risk: p.risk,
                description: p.description,
            })
            .collect();

        let mut cumulative = self.peak;
        for p in &patterns {
            cumulative = cumulative.max(p.risk);
        }
        if self.high_risk_count >= ESCALATE_CRITICAL_AFTER {
            cumulative = RiskLevel::Critical;
        } else if self.high_risk_count >= ESCALATE_HIGH_AFTER {
            cumulative = cumulative.max(RiskLevel::High);
        }
        self.peak = cumulative;

        if !patterns.is_empty() {
            log::warn!(
                "workflow pattern detected: {}",
                patterns.iter().map(|p| p.name).collect::<Vec<_>>().join(", ")
            );
        }

        SessionAssessment {
            cumulative_risk: cumulative,
            patterns,
            high_risk_count: self.high_risk_count,
        }
    }

    /// Remember paths a command may destroy, newest last.
    pub fn track_paths(&mut self, paths: impl IntoIterator<Item = String>) {
        for path in paths {
            if !self.files_at_risk.contains(&path) {
                self.files_at_risk.push(path);
            }
        }
        let excess = self.files_at_risk.len().saturating_sub(MAX_FILES_AT_RISK);
        self.files_at_risk.drain(..excess);
    }

    pub fn files_at_risk(&self) -> &[String] {
        &self.files_at_risk
    }

    /// Mark a warning as shown. Returns `false` if it already was.
    pub fn first_warning(&mut self, key: &str) -> bool {
        self.shown_warnings.insert(key.to_string())
    }

    /// Forget escalation that is no longer backed by the window.
    ///
    /// The peak drops to the highest risk still in the window and the
    /// high-risk count to the number of such commands there.
    pub fn reset_peak(&mut self) {
        self.peak = self
            .recent
            .iter()
            .map(|r| r.risk)
            .max()
            .unwrap_or(RiskLevel::Low);
        self.high_risk_count = self
            .recent
            .iter()
            .filter(|r| r.risk >= RiskLevel::High)
            .count();
    }

    pub fn peak(&self) -> RiskLevel {
        self.peak
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        self.last_seen
    }

    /// Whether nothing was recorded since `cutoff`.
    pub fn idle_since(&self, cutoff: DateTime<Utc>) -> bool {
        self.last_seen < cutoff
    }

    pub fn len(&self) -> usize {
        self.recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recent.is_empty()
    }

    /// Risk of the most recent command recorded, if any.
    pub fn last_risk(&self) -> Option<RiskLevel> {
        self.recent.back().map(|r| r.risk)
    }

    #[cfg(test)]
    pub(crate) fn set_last_seen(&mut self, at: DateTime<Utc>) {
        self.last_seen = at;
    }
}
