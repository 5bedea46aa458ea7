//! Notification Sink: out-of-band alerts for critical audit events.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::AuditConfig;
use crate::error::NotifyError;
use crate::verdict::RiskLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    CriticalEvent,
    SecurityViolation,
    IntegrityFailure,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub kind: AlertKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<RiskLevel>,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(kind: AlertKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            event_id: None,
            risk_level: None,
            timestamp: Utc::now(),
        }
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, alert: &Alert) -> Result<(), NotifyError>;

    fn name(&self) -> &str;
}

/// POSTs the alert as JSON.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    async fn send(&self, alert: &Alert) -> Result<(), NotifyError> {
        self.client
            .post(&self.url)
            .json(alert)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

/// Prints to stderr so it never mixes with hook output on stdout.
pub struct ConsoleNotifier;

#[async_trait]
impl NotificationSink for ConsoleNotifier {
    async fn send(&self, alert: &Alert) -> Result<(), NotifyError> {
        eprintln!("agent-gate ALERT [{:?}] {}", alert.kind, alert.message);
        Ok(())
    }

    fn name(&self) -> &str {
        "console"
    }
}

/// The sinks an audit configuration asks for.
pub fn sinks_from_config(config: &AuditConfig) -> Vec<std::sync::Arc<dyn NotificationSink>> {
    let mut sinks: Vec<std::sync::Arc<dyn NotificationSink>> = Vec::new();
    if let Some(url) = &config.webhook_url {
        sinks.push(std::sync::Arc::new(WebhookNotifier::new(url.clone())));
    }
    if config.console_alerts {
        sinks.push(std::sync::Arc::new(ConsoleNotifier));
    }
    sinks
}
