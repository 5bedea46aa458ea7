//! Redactor: replace credential-shaped substrings with typed placeholders.
//!
//! Runs over command lines before they reach the decision log, the audit
//! metadata, or an alert. Patterns are tried most-specific first; a value
//! that is already a placeholder is left alone, so redaction is idempotent.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::Serialize;

const PLACEHOLDER_PREFIX: &str = "[REDACTED_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecretKind {
    PrivateKey,
    AwsKey,
    GithubToken,
    Jwt,
    ApiKey,
    BearerToken,
    Password,
    Secret,
}

impl SecretKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SecretKind::PrivateKey => "PRIVATE_KEY",
            SecretKind::AwsKey => "AWS_KEY",
            SecretKind::GithubToken => "GITHUB_TOKEN",
            SecretKind::Jwt => "JWT",
            SecretKind::ApiKey => "API_KEY",
            SecretKind::BearerToken => "BEARER_TOKEN",
            SecretKind::Password => "PASSWORD",
            SecretKind::Secret => "SECRET",
        }
    }

    pub fn placeholder(self) -> String {
        format!("{PLACEHOLDER_PREFIX}{}]", self.as_str())
    }
}

/// A pattern; when it has a `secret` group only that group is replaced.
struct Rule {
    kind: SecretKind,
    pattern: Regex,
}

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    let rule = |kind, pattern: &str| Rule {
        kind,
        pattern: Regex::new(pattern).expect("invalid redaction regex"),
    };
    vec![
        rule(
            SecretKind::PrivateKey,
            r"-----BEGIN [A-Z ]*PRIVATE KEY-----[\s\S]*?-----END [A-Z ]*PRIVATE KEY-----",
        ),
        rule(SecretKind::AwsKey, r"\b(?:AKIA|ASIA)[0-9A-Z]{16}\b"),
        rule(
            SecretKind::GithubToken,
            r"\b(?:gh[pousr]_[A-Za-z0-9]{36,}|github_pat_[A-Za-z0-9_]{22,})",
        ),
        rule(
            SecretKind::Jwt,
            r"\beyJ[A-Za-z0-9_-]{8,}\.[A-Za-z0-9_-]{8,}\.[A-Za-z0-9_-]{8,}",
        ),
        rule(SecretKind::ApiKey, r"\b(?:sk|pk|rk)-[A-Za-z0-9_-]{16,}"),
        rule(
            SecretKind::BearerToken,
            r"(?i)\bbearer\s+(?P<secret>[A-Za-z0-9._~+/-]+=*)",
        ),
        rule(
            SecretKind::Password,
            r#"(?i)\b[A-Z0-9_]*(?:password|passwd)\s*[=:]\s*(?P<secret>[^\s'"]+)"#,
        ),
        rule(SecretKind::Password, r#"(?i)--password\s+(?P<secret>[^\s'"]+)"#),
        rule(
            SecretKind::Secret,
            r#"(?i)\b[A-Z0-9_]*(?:SECRET|TOKEN|API_?KEY|ACCESS_KEY|CREDENTIALS?)[A-Z0-9_]*\s*[=:]\s*(?P<secret>[^\s'"]+)"#,
        ),
    ]
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Redacted {
    pub text: String,
    pub count: usize,
    pub kinds: BTreeSet<SecretKind>,
}

/// Redact every recognised secret in `text`.
pub fn redact(text: &str) -> Redacted {
    let mut out = text.to_string();
    let mut count = 0;
    let mut kinds = BTreeSet::new();

    for rule in RULES.iter() {
        let replaced = rule.pattern.replace_all(&out, |caps: &Captures| {
            let whole = &caps[0];
            let Some(secret) = caps.name("secret") else {
                if whole.starts_with(PLACEHOLDER_PREFIX) {
                    return whole.to_string();
                }
                count += 1;
                kinds.insert(rule.kind);
                return rule.kind.placeholder();
            };
            if secret.as_str().starts_with(PLACEHOLDER_PREFIX) {
                return whole.to_string();
            }
            count += 1;
            kinds.insert(rule.kind);
            let start = caps.get(0).map_or(0, |m| m.start());
            let mut value = whole.to_string();
            value.replace_range(
                secret.start() - start..secret.end() - start,
                &rule.kind.placeholder(),
            );
            value
        });
        out = replaced.into_owned();
    }

    Redacted {
        text: out,
        count,
        kinds,
    }
}

/// Flags whose following argument is a secret.
const SECRET_FLAGS: &[(&str, SecretKind)] = &[
    ("--password", SecretKind::Password),
    ("--passwd", SecretKind::Password),
    ("--token", SecretKind::Secret),
    ("--api-key", SecretKind::ApiKey),
    ("--secret", SecretKind::Secret),
];

/// Redact each argument, and the value following a secret-bearing flag.
pub fn redact_args(args: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len());
    let mut pending: Option<SecretKind> = None;
    for arg in args {
        if let Some(kind) = pending.take() {
            out.push(kind.placeholder());
            continue;
        }
        pending = SECRET_FLAGS
            .iter()
            .find(|(flag, _)| arg.eq_ignore_ascii_case(flag))
            .map(|(_, kind)| *kind);
        out.push(redact(arg).text);
    }
    out
}

/// Redacted text only.
pub fn redact_str(text: &str) -> String {
    redact(text).text
}
