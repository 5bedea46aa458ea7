//! Authorization Token System.
//!
//! Short-lived, single-use codes that let an agent run one specific
//! pre-approved command. The exact `(command, args)` tuple is frozen at
//! issue time; redemption hands that tuple back, never a string to re-parse.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::RngExt;
use serde::Serialize;
use tokio::time::Instant;

use crate::router::CommandInvocation;

pub const INVALID_REASON: &str = "Invalid or expired auth code";
pub const USED_REASON: &str = "Auth code already used";
pub const EXPIRED_REASON: &str = "Auth code expired";

const ADJECTIVES: &[&str] = &[
    "swift", "quiet", "brave", "calm", "eager", "fuzzy", "gentle", "happy", "jolly", "keen",
    "lucky", "mellow", "noble", "proud", "rapid", "sunny", "tidy", "vivid", "witty", "zesty",
];

const NOUNS: &[&str] = &[
    "eagle", "otter", "falcon", "badger", "heron", "lynx", "panda", "raven", "tiger", "walrus",
    "bison", "cobra", "dingo", "gecko", "koala", "lemur", "moose", "quail", "stoat", "yak",
];

/// Frozen at issuance and returned on redemption.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenData {
    pub invocation: CommandInvocation,
    /// Whatever analysis justified issuing the token.
    pub analysis: serde_json::Value,
    pub issued_at: DateTime<Utc>,
}

struct AuthToken {
    data: TokenData,
    issued: Instant,
    used: bool,
}

/// Structured redemption result; redemption never fails with an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Redemption {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<TokenData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Redemption {
    fn rejected(reason: &str) -> Self {
        Self {
            valid: false,
            data: None,
            reason: Some(reason.to_string()),
        }
    }
}

pub struct TokenStore {
    tokens: Mutex<HashMap<String, AuthToken>>,
    ttl: Duration,
}

impl TokenStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Issue a code for `invocation`.
    ///
    /// Codes are human-readable and best-effort unique; a collision with a
    /// live code re-rolls.
    pub fn issue(&self, invocation: CommandInvocation, analysis: serde_json::Value) -> String {
        let mut tokens = self.tokens.lock();
        let mut code = generate_code();
        let mut attempts = 0;
        while tokens.contains_key(&code) && attempts < 8 {
            code = generate_code();
            attempts += 1;
        }
        log::debug!("issued auth code {code} for {}", invocation.command());
        tokens.insert(
            code.clone(),
            AuthToken {
                data: TokenData {
                    invocation,
                    analysis,
                    issued_at: Utc::now(),
                },
                issued: Instant::now(),
                used: false,
            },
        );
        code
    }

    /// Redeem a code. At most one call per code ever observes `valid`.
    pub fn redeem(&self, code: &str) -> Redemption {
        let mut tokens = self.tokens.lock();
        let Some(token) = tokens.get_mut(code) else {
            return Redemption::rejected(INVALID_REASON);
        };
        if token.used {
            return Redemption::rejected(USED_REASON);
        }
        if token.issued.elapsed() > self.ttl {
            tokens.remove(code);
            log::debug!("auth code {code} expired");
            return Redemption::rejected(EXPIRED_REASON);
        }
        token.used = true;
        Redemption {
            valid: true,
            data: Some(token.data.clone()),
            reason: None,
        }
    }

    /// Delete every entry past its TTL. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let mut tokens = self.tokens.lock();
        let before = tokens.len();
        tokens.retain(|_, t| t.issued.elapsed() <= self.ttl);
        let removed = before - tokens.len();
        if removed > 0 {
            log::debug!("swept {removed} expired auth codes");
        }
        removed
    }

    /// Live entries after a sweep.
    pub fn active_count(&self) -> usize {
        self.cleanup();
        self.tokens.lock().len()
    }
}

/// `adjective-noun-N` with N in `0..100`.
pub fn generate_code() -> String {
    let mut rng = rand::rng();
    let adjective = ADJECTIVES[rng.random_range(0..ADJECTIVES.len())];
    let noun = NOUNS[rng.random_range(0..NOUNS.len())];
    let number: u8 = rng.random_range(0..100);
    format!("{adjective}-{noun}-{number}")
}
