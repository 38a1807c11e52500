use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;

use crate::api::ws_types::WsMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Success,
    Warning,
    Error,
}

impl NotificationLevel {
    fn icon(self) -> &'static str {
        match self {
            NotificationLevel::Success => "✅",
            NotificationLevel::Warning => "⚠️",
            NotificationLevel::Error => "❌",
        }
    }
}

/// A user-facing outcome message, shown on the dashboard and optionally relayed to Telegram.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Telegram relay. Failures are logged but never block the main flow.
#[derive(Debug, Clone)]
pub struct TelegramSink {
    http: reqwest::Client,
    bot_token: String,
    chat_id: String,
}

impl TelegramSink {
    pub fn new(http: reqwest::Client, bot_token: String, chat_id: String) -> Self {
        Self {
            http,
            bot_token,
            chat_id,
        }
    }

    /// Send a Telegram message. Failures are logged as warnings.
    pub async fn send(&self, message: &str) {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);

        let body = json!({
            "chat_id": self.chat_id,
            "text": message,
            "parse_mode": "Markdown",
        });

        match self.http.post(&url).json(&body).send().await {
            Ok(resp) => {
                if !resp.status().is_success() {
                    tracing::warn!(
                        status = %resp.status(),
                        "Telegram sendMessage returned non-2xx"
                    );
                }
            }
            Err(e) => {
                // without_url keeps the bot token out of the log line
                tracing::warn!(error = %e.without_url(), "Failed to send Telegram notification");
            }
        }
    }
}

/// Fan-out for notifications and dashboard updates.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<WsMessage>,
    telegram: Option<TelegramSink>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, telegram: None }
    }

    pub fn with_telegram(mut self, telegram: Option<TelegramSink>) -> Self {
        self.telegram = telegram;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WsMessage> {
        self.tx.subscribe()
    }

    /// Broadcast to dashboard clients. Having no subscribers is not an error.
    pub fn publish(&self, message: WsMessage) {
        let _ = self.tx.send(message);
    }

    pub fn notify(&self, level: NotificationLevel, title: impl Into<String>, message: impl Into<String>) {
        let notification = Notification {
            level,
            title: title.into(),
            message: message.into(),
            timestamp: Utc::now(),
        };

        match level {
            NotificationLevel::Error => {
                tracing::error!(title = %notification.title, message = %notification.message, "Notification")
            }
            NotificationLevel::Warning => {
                tracing::warn!(title = %notification.title, message = %notification.message, "Notification")
            }
            NotificationLevel::Success => {
                tracing::info!(title = %notification.title, message = %notification.message, "Notification")
            }
        }

        if let Some(telegram) = self.telegram.clone() {
            let text = format_telegram(&notification);
            tokio::spawn(async move {
                telegram.send(&text).await;
            });
        }

        self.publish(WsMessage::Notification(notification));
    }

    pub fn success(&self, title: impl Into<String>, message: impl Into<String>) {
        self.notify(NotificationLevel::Success, title, message);
    }

    pub fn warning(&self, title: impl Into<String>, message: impl Into<String>) {
        self.notify(NotificationLevel::Warning, title, message);
    }

    pub fn error(&self, title: impl Into<String>, message: impl Into<String>) {
        self.notify(NotificationLevel::Error, title, message);
    }
}

fn format_telegram(n: &Notification) -> String {
    format!("{} *{}*\n{}", n.level.icon(), n.title, n.message)
}
