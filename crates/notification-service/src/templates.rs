use crate::Notification;

pub struct EmailTemplate;

impl EmailTemplate {
    /// Plain-text email body for an operator alert.
    pub fn render(notification: &Notification) -> String {
        format!(
            "{message}\n\n--\nSent at {ts} UTC by prediction-logger",
            message = notification.message.trim_end(),
            ts = notification.timestamp.format("%Y-%m-%d %H:%M:%S"),
        )
    }
}
