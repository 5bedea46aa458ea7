//! Threat indicators: literal command signatures and regex patterns.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ThreatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Contribution of one match to the combined risk score.
    pub fn weight(self) -> f64 {
        match self {
            Severity::Low => 0.1,
            Severity::Medium => 0.3,
            Severity::High => 0.6,
            Severity::Critical => 0.9,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorKind {
    /// Literal command name, argument, or multi-word phrase.
    Command,
    /// Regular expression over the full command line.
    Pattern,
}

impl IndicatorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            IndicatorKind::Command => "command",
            IndicatorKind::Pattern => "pattern",
        }
    }
}

/// Caller-supplied description of a new indicator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorInput {
    #[serde(rename = "type")]
    pub kind: IndicatorKind,
    pub severity: Severity,
    pub indicator: String,
    pub description: String,
    #[serde(default)]
    pub mitigations: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl IndicatorInput {
    pub fn command(severity: Severity, indicator: &str, description: &str) -> Self {
        Self {
            kind: IndicatorKind::Command,
            severity,
            indicator: indicator.into(),
            description: description.into(),
            mitigations: Vec::new(),
            tags: Vec::new(),
        }
    }

    pub fn pattern(severity: Severity, indicator: &str, description: &str) -> Self {
        Self {
            kind: IndicatorKind::Pattern,
            ..Self::command(severity, indicator, description)
        }
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_mitigations(mut self, mitigations: &[&str]) -> Self {
        self.mitigations = mitigations.iter().map(|m| m.to_string()).collect();
        self
    }
}

/// A false-positive annotation. Lowers confidence, never deletes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FalsePositiveReport {
    pub context: String,
    pub reported_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ThreatIndicator {
    pub id: String,
    pub kind: IndicatorKind,
    pub severity: Severity,
    pub matcher: String,
    pub description: String,
    pub tags: BTreeSet<String>,
    pub mitigations: Vec<String>,
    pub false_positives: Vec<FalsePositiveReport>,
    compiled: Option<Regex>,
}

impl ThreatIndicator {
    pub fn compile(id: String, input: IndicatorInput) -> Result<Self, ThreatError> {
        if input.indicator.trim().is_empty() {
            return Err(ThreatError::EmptyMatcher);
        }
        let compiled = match input.kind {
            IndicatorKind::Pattern => Some(Regex::new(&input.indicator)?),
            IndicatorKind::Command => None,
        };
        Ok(Self {
            id,
            kind: input.kind,
            severity: input.severity,
            matcher: input.indicator,
            description: input.description,
            tags: input.tags.into_iter().collect(),
            mitigations: input.mitigations,
            false_positives: Vec::new(),
            compiled,
        })
    }

    /// Each false-positive report shaves 10% off, down to a floor of half.
    pub fn confidence(&self) -> f64 {
        (1.0 - 0.1 * self.false_positives.len() as f64).max(0.5)
    }

    /// Effective score contribution after false-positive adjustment.
    pub fn effective_weight(&self) -> f64 {
        self.severity.weight() * self.confidence()
    }

    /// The substring this indicator matched, if any.
    ///
    /// Command indicators match the command name or an argument exactly; a
    /// phrase containing whitespace matches anywhere in the full line.
    pub fn find_match(&self, command: &str, args: &[String], line: &str) -> Option<String> {
        if let Some(re) = &self.compiled {
            return re.find(line).map(|m| m.as_str().to_string());
        }
        let hit = if self.matcher.contains(char::is_whitespace) {
            line.contains(self.matcher.as_str())
        } else {
            command == self.matcher || args.iter().any(|a| *a == self.matcher)
        };
        hit.then(|| self.matcher.clone())
    }
}

/// Indicators every engine starts with.
pub fn seed_indicators() -> Vec<IndicatorInput> {
    use Severity::*;
    vec![
        IndicatorInput::pattern(
            Critical,
            r"\brm\s+(?:-\S+\s+)*(?:/|/\*|~|~/)(?:\s|$)",
            "recursive deletion of the filesystem root or home directory",
        )
        .with_tags(&["destructive", "filesystem"])
        .with_mitigations(&["Restrict deletions to explicit project paths"]),
        IndicatorInput::pattern(
            Critical,
            r"\bdd\b.*\bof=/dev/(?:sd|hd|vd|nvme|disk|mmcblk)",
            "raw write to a block device",
        )
        .with_tags(&["destructive", "disk"])
        .with_mitigations(&["Write disk images to a file, never to a device node"]),
        IndicatorInput::pattern(
            Critical,
            r"\bmkfs(?:\.\w+)?\b",
            "filesystem creation wipes the target device",
        )
        .with_tags(&["destructive", "disk"]),
        IndicatorInput::pattern(
            Critical,
            r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
            "fork bomb",
        )
        .with_tags(&["denial-of-service"]),
        IndicatorInput::pattern(
            High,
            r">\s*/dev/(?:sd|hd|vd|nvme)[a-z0-9]*",
            "redirection onto a block device",
        )
        .with_tags(&["destructive", "disk"]),
        IndicatorInput::pattern(
            High,
            r"\b(?:curl|wget)\b[^|]*\|\s*(?:sudo\s+)?(?:ba|z|da|k)?sh\b",
            "remote script piped into a shell",
        )
        .with_tags(&["remote-code", "network"])
        .with_mitigations(&["Download the script, inspect it, then run it explicitly"]),
        IndicatorInput::pattern(
            High,
            r"\bbase64\s+(?:-d|--decode)\b.*\|\s*(?:ba|z)?sh\b",
            "obfuscated payload decoded into a shell",
        )
        .with_tags(&["obfuscation", "remote-code"]),
        IndicatorInput::pattern(
            High,
            r"/dev/tcp/|\b(?:nc|ncat|netcat)\b.*\s-[ec]\s",
            "reverse shell",
        )
        .with_tags(&["network", "persistence"])
        .with_mitigations(&["Terminate the session and review outbound connections"]),
        IndicatorInput::pattern(
            High,
            r"/etc/shadow|\.ssh/id_[a-z0-9]+|\.aws/credentials|\.kube/config",
            "access to credential material",
        )
        .with_tags(&["credentials", "exfiltration"])
        .with_mitigations(&["Rotate any credential that may have been read"]),
        IndicatorInput::pattern(
            High,
            r"\bchmod\s+(?:-R\s+)?0?777\b",
            "world-writable permissions",
        )
        .with_tags(&["permissions"]),
        IndicatorInput::pattern(High, r"\bcrontab\s+-r\b", "removal of all cron jobs")
            .with_tags(&["destructive", "persistence"]),
        IndicatorInput::pattern(
            Medium,
            r"\bhistory\s+-c\b|HISTFILE=/dev/null|\bunset\s+HISTFILE\b",
            "shell history tampering",
        )
        .with_tags(&["anti-forensics"]),
        IndicatorInput::pattern(
            Medium,
            r"\bgit\s+push\b.*(?:--force\b|-f\b)",
            "force push rewrites shared history",
        )
        .with_tags(&["vcs", "destructive"])
        .with_mitigations(&["Prefer --force-with-lease on a personal branch"]),
        IndicatorInput::pattern(
            Medium,
            r"\bgit\s+(?:reset\s+--hard|clean\s+-[a-z]*f)",
            "discards uncommitted work",
        )
        .with_tags(&["vcs", "destructive"]),
        IndicatorInput::command(Medium, "dd", "raw block copy utility").with_tags(&["disk"]),
        IndicatorInput::command(High, "shred", "irrecoverable file overwrite")
            .with_tags(&["destructive"]),
        IndicatorInput::command(Medium, "eval", "evaluates arbitrary shell text")
            .with_tags(&["remote-code"]),
        IndicatorInput::command(Low, "sudo", "privilege escalation").with_tags(&["privilege"]),
        IndicatorInput::command(Medium, "rm -rf", "recursive forced deletion")
            .with_tags(&["destructive", "filesystem"]),
    ]
}
