use async_trait::async_trait;
use std::time::Duration;

use crate::{Notification, NotificationChannel, NotificationError};

/// Chat-style incoming webhook (Slack compatible `{"text": ...}` payload).
pub struct WebhookNotifier {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotificationError::Config(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            name: name.into(),
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl NotificationChannel for WebhookNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        let payload = serde_json::json!({ "text": notification.message });

        self.client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| NotificationError::Webhook(e.to_string()))?;

        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
