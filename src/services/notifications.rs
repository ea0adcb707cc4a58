//! Outbound chat notifications about lending activity.
//!
//! Workflows publish a message after their transaction has committed; a
//! background task drains the queue and hands each message to a
//! [`Notifier`]. Delivery is best effort: failures are logged and dropped.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::json;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    config::NotificationsConfig,
    error::{AppError, AppResult},
};

/// Message sink; implementations swallow their own errors
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: String);
}

/// Posts `{"text": message}` to a chat webhook
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String, timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, url })
    }

    async fn post(&self, message: &str) -> Result<(), reqwest::Error> {
        self.client
            .post(&self.url)
            .json(&json!({ "text": message }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, message: String) {
        if let Err(e) = self.post(&message).await {
            tracing::warn!(error = %e, "Failed to deliver notification");
        }
    }
}

/// Used when no webhook is configured
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: String) {
        tracing::debug!(%message, "Notification (no webhook configured)");
    }
}

/// Build the notifier described by the configuration
pub fn notifier_from_config(config: &NotificationsConfig) -> AppResult<Arc<dyn Notifier>> {
    match config.webhook_url {
        Some(ref url) if !url.is_empty() => Ok(Arc::new(WebhookNotifier::new(
            url.clone(),
            Duration::from_secs(config.timeout_seconds),
        )?)),
        _ => Ok(Arc::new(LogNotifier)),
    }
}

/// Publishing side of the notification queue
#[derive(Clone)]
pub struct NotificationDispatcher {
    sender: mpsc::UnboundedSender<String>,
}

impl NotificationDispatcher {
    /// Start the delivery task. It stops once every dispatcher clone is dropped.
    pub fn start(notifier: Arc<dyn Notifier>) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::unbounded_channel::<String>();
        let worker = tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                notifier.send(message).await;
            }
        });
        (Self { sender }, worker)
    }

    /// Dispatcher whose messages are read directly from the returned receiver
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Queue a message; never fails the caller
    pub fn publish(&self, message: String) {
        if self.sender.send(message).is_err() {
            tracing::warn!("Notification queue closed, message dropped");
        }
    }
}
