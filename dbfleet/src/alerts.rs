//! Webhook alert delivery.
//!
//! Delivery is best-effort and fire-and-forget: one attempt per
//! notification, bounded by the configured send timeout, and every failure
//! ends at a log line. Nothing here decides *when* to alert; the triggering
//! policy lives with the jobs that observe orchestration outcomes.

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::AlertConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertSeverity {
    Critical,
    Warning,
    Info,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AlertSeverity::Critical => "CRITICAL",
            AlertSeverity::Warning => "WARNING",
            AlertSeverity::Info => "INFO",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertPayload {
    pub timestamp: DateTime<Utc>,
    pub severity: AlertSeverity,
    pub subject: String,
    pub body: String,
    pub recipients: Vec<String>,
}

pub struct AlertDispatcher {
    enabled: bool,
    webhook_url: String,
    recipients: Vec<String>,
    send_timeout: Duration,
    client: Client,
}

impl AlertDispatcher {
    pub fn new(config: &AlertConfig) -> Self {
        let send_timeout = Duration::from_secs(config.send_timeout_seconds.max(1));
        let client = Client::builder()
            .timeout(send_timeout)
            .build()
            .expect("Failed to create HTTP client for AlertDispatcher");

        Self {
            enabled: config.enabled && !config.webhook_url.is_empty(),
            webhook_url: config.webhook_url.clone(),
            recipients: config.recipients.clone(),
            send_timeout,
            client,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Deliver one notification. Never blocks beyond the send timeout and
    /// never surfaces a failure to the caller. When alerting is disabled
    /// this returns before any request is built.
    pub async fn notify(&self, subject: &str, body: &str, severity: AlertSeverity) {
        if !self.enabled {
            debug!(subject, "alerting disabled, dropping notification");
            return;
        }

        let payload = AlertPayload {
            timestamp: Utc::now(),
            severity,
            subject: format!("[DBFLEET-{}] {}", severity, subject),
            body: body.to_string(),
            recipients: self.recipients.clone(),
        };

        match timeout(
            self.send_timeout,
            self.client.post(&self.webhook_url).json(&payload).send(),
        )
        .await
        {
            Ok(Ok(response)) => {
                if response.status().is_success() {
                    info!(subject, severity = %severity, "alert sent");
                } else {
                    warn!(
                        subject,
                        status = %response.status(),
                        "alert webhook returned non-success status"
                    );
                }
            }
            Ok(Err(e)) => {
                warn!(subject, "failed to send alert: {}", e);
            }
            Err(_) => {
                warn!(subject, "alert webhook timed out");
            }
        }
    }
}

impl Clone for AlertDispatcher {
    fn clone(&self) -> Self {
        Self {
            enabled: self.enabled,
            webhook_url: self.webhook_url.clone(),
            recipients: self.recipients.clone(),
            send_timeout: self.send_timeout,
            client: self.client.clone(),
        }
    }
}
