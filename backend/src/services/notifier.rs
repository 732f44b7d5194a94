//! # Notifier
//!
//! Outbound notifications (deposit and withdrawal decisions, admin alerts).
//!
//! Notifications are sent only after the unit of work that caused them has
//! committed. A failed notification is logged and never undoes the ledger
//! change.
//!
//! | Implementation | Used when |
//! |----------------|-----------|
//! | [`LogNotifier`] | `EMAIL_API_URL` unset |
//! | [`HttpEmailNotifier`] | `EMAIL_API_URL` set |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::EmailSettings;

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Notification transport failed: {0}")]
    Transport(String),

    #[error("Notification rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, recipient: &str, subject: &str, body: &str) -> Result<(), NotificationError>;
}

/// Send and log any failure. The result is intentionally discarded.
pub async fn notify_best_effort(notifier: &dyn Notifier, recipient: &str, subject: &str, body: &str) {
    if let Err(e) = notifier.notify(recipient, subject, body).await {
        warn!("Notification to {} failed ({}): {}", recipient, subject, e);
    }
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, recipient: &str, subject: &str, body: &str) -> Result<(), NotificationError> {
        info!("📧 To {}: {} | {}", recipient, subject, body);
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct EmailRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    body: &'a str,
}

/// Posts notifications to an HTTP email gateway as JSON.
pub struct HttpEmailNotifier {
    settings: EmailSettings,
    client: Client,
}

impl HttpEmailNotifier {
    pub fn new(settings: EmailSettings, timeout_secs: u64) -> Result<Self, NotificationError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| NotificationError::Transport(e.to_string()))?;

        Ok(Self { settings, client })
    }
}

#[async_trait]
impl Notifier for HttpEmailNotifier {
    async fn notify(&self, recipient: &str, subject: &str, body: &str) -> Result<(), NotificationError> {
        let request = EmailRequest {
            from: &self.settings.from,
            to: recipient,
            subject,
            body,
        };

        let mut builder = self.client.post(&self.settings.api_url).json(&request);
        if let Some(key) = &self.settings.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| NotificationError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::Rejected { status, body });
        }

        info!("Email sent to {}: {}", recipient, subject);
        Ok(())
    }
}

/// Pick the notifier for the configured settings.
pub fn from_settings(settings: Option<&EmailSettings>) -> Result<Arc<dyn Notifier>, NotificationError> {
    match settings {
        Some(settings) => Ok(Arc::new(HttpEmailNotifier::new(settings.clone(), 10)?)),
        None => Ok(Arc::new(LogNotifier)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        assert!(LogNotifier.notify("a@example.com", "hello", "body").await.is_ok());
    }

    #[test]
    fn test_from_settings_without_gateway_logs() {
        assert!(from_settings(None).is_ok());
    }
}
