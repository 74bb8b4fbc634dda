mod smtp;
mod templates;
mod webhook;

pub use smtp::SmtpNotifier;
pub use templates::EmailTemplate;
pub use webhook::WebhookNotifier;

use async_trait::async_trait;
use std::time::Duration;

pub const DEFAULT_SUBJECT: &str = "Prediction Logger Notification";

/// An operator alert to be delivered.
#[derive(Debug, Clone)]
pub struct Notification {
    pub subject: String,
    pub message: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl Notification {
    pub fn new(message: impl Into<String>, subject: Option<&str>) -> Self {
        Self {
            subject: subject.unwrap_or(DEFAULT_SUBJECT).to_string(),
            message: message.into(),
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Trait for notification channels.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError>;
    fn name(&self) -> &str;
}

/// Errors from the notification system.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("SMTP error: {0}")]
    Smtp(String),
    #[error("Webhook error: {0}")]
    Webhook(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// How many times a channel is tried and how long to wait between tries.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn single() -> Self {
        Self {
            max_attempts: 1,
            backoff_base: Duration::ZERO,
        }
    }

    /// `max_attempts` tries, sleeping `2^attempt` seconds after each failure.
    pub fn exponential(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base: Duration::from_secs(1),
        }
    }

    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Delay after the failed attempt with zero-based index `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff_base * 2u32.saturating_pow(attempt)
    }
}

/// SMTP settings. All of `to`, `from` and `server` are needed to send.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub to: Vec<String>,
    pub from: String,
    pub server: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Configuration for the notification service.
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    pub primary_webhook_url: Option<String>,
    pub secondary_webhook_url: Option<String>,
    pub email: Option<EmailConfig>,
    /// Upper bound for a single delivery attempt on any channel.
    pub timeout: Duration,
    pub primary_retry: RetryPolicy,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            primary_webhook_url: None,
            secondary_webhook_url: None,
            email: None,
            timeout: Duration::from_secs(5),
            primary_retry: RetryPolicy::exponential(3),
        }
    }
}

/// Result of a `notify` call. Never an error: exhaustion is only logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Delivered { channel: String, attempts: u32 },
    Exhausted,
}

struct ChannelStep {
    channel: Box<dyn NotificationChannel>,
    retry: RetryPolicy,
}

/// Best-effort delivery over an ordered list of channels.
///
/// Channels are tried in order; the first success stops the walk. The order
/// built by [`Notifier::from_config`] is primary webhook (with retry), then
/// secondary webhook, then email.
pub struct Notifier {
    chain: Vec<ChannelStep>,
}

impl Notifier {
    pub fn new() -> Self {
        Self { chain: Vec::new() }
    }

    /// Append a channel to the end of the fallback order.
    pub fn with_channel(mut self, channel: Box<dyn NotificationChannel>, retry: RetryPolicy) -> Self {
        self.chain.push(ChannelStep { channel, retry });
        self
    }

    pub fn from_config(config: &NotificationConfig) -> Self {
        let mut notifier = Self::new();

        if let Some(ref url) = config.primary_webhook_url {
            match WebhookNotifier::new("primary-webhook", url, config.timeout) {
                Ok(channel) => {
                    notifier = notifier.with_channel(Box::new(channel), config.primary_retry);
                }
                Err(e) => tracing::warn!("Failed to initialize primary webhook: {}", e),
            }
        }

        if let Some(ref url) = config.secondary_webhook_url {
            match WebhookNotifier::new("secondary-webhook", url, config.timeout) {
                Ok(channel) => {
                    notifier = notifier.with_channel(Box::new(channel), RetryPolicy::single());
                }
                Err(e) => tracing::warn!("Failed to initialize secondary webhook: {}", e),
            }
        }

        if let Some(ref email) = config.email {
            match SmtpNotifier::new(email, config.timeout) {
                Ok(channel) => {
                    tracing::info!(
                        "Email notifications enabled (SMTP -> {} recipients)",
                        email.to.len()
                    );
                    notifier = notifier.with_channel(Box::new(channel), RetryPolicy::single());
                }
                Err(e) => tracing::warn!("Failed to initialize SMTP notifier: {}", e),
            }
        }

        if notifier.chain.is_empty() {
            tracing::info!("No notification channels configured");
        }

        notifier
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.chain.iter().map(|step| step.channel.name()).collect()
    }

    /// Deliver `message`, walking the channel chain until one succeeds.
    pub async fn notify(&self, message: impl Into<String>, subject: Option<&str>) -> Delivery {
        let notification = Notification::new(message, subject);

        for step in &self.chain {
            if let Some(attempts) = Self::deliver(step, &notification).await {
                tracing::info!("Notification sent via {}", step.channel.name());
                return Delivery::Delivered {
                    channel: step.channel.name().to_string(),
                    attempts,
                };
            }
        }

        tracing::error!("All notification channels failed");
        Delivery::Exhausted
    }

    async fn deliver(step: &ChannelStep, notification: &Notification) -> Option<u32> {
        for attempt in 0..step.retry.max_attempts {
            match step.channel.send(notification).await {
                Ok(()) => return Some(attempt + 1),
                Err(e) => {
                    tracing::warn!(
                        "{} notify attempt {} failed: {}",
                        step.channel.name(),
                        attempt + 1,
                        e
                    );
                    if attempt + 1 < step.retry.max_attempts {
                        tokio::time::sleep(step.retry.delay(attempt)).await;
                    }
                }
            }
        }
        None
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}
