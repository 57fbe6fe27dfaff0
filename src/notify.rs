//! Operator notifications
//!
//! State machines hand text to a [`NotificationSink`], which never blocks;
//! a single dispatcher task drains it into the configured [`Notifier`].

use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::TelegramConfig;
use crate::types::{ExitReason, LifecyclePhase, TradeCandidate};

const TELEGRAM_API: &str = "https://api.telegram.org";

/// Delivery backend for operator messages
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> anyhow::Result<()>;
}

/// Telegram bot `sendMessage` with HTML formatting
pub struct TelegramNotifier {
    client: Client,
    base_url: String,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, chat_id: String) -> anyhow::Result<Self> {
        Self::with_base_url(TELEGRAM_API, bot_token, chat_id)
    }

    pub fn with_base_url(base_url: &str, bot_token: String, chat_id: String) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bot_token,
            chat_id,
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> anyhow::Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.bot_token);
        let payload = serde_json::json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "HTML",
        });

        let response = self.client.post(&url).json(&payload).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Telegram sendMessage failed: {} - {}", status, body));
        }

        debug!("Telegram message sent");
        Ok(())
    }
}

/// Fallback when no chat is configured
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str) -> anyhow::Result<()> {
        info!("NOTIFY: {}", text.replace('\n', " | "));
        Ok(())
    }
}

/// Telegram when both token and chat are set, log-only otherwise
pub fn notifier_from_config(config: &TelegramConfig) -> anyhow::Result<Arc<dyn Notifier>> {
    match (&config.bot_token, &config.chat_id) {
        (Some(token), Some(chat)) if !token.is_empty() && !chat.is_empty() => {
            Ok(Arc::new(TelegramNotifier::new(token.clone(), chat.clone())?))
        }
        _ => {
            warn!("Telegram not configured, notifications go to the log only");
            Ok(Arc::new(LogNotifier))
        }
    }
}

/// Fire-and-forget handle for emitting notifications
#[derive(Debug, Clone)]
pub struct NotificationSink {
    tx: mpsc::UnboundedSender<String>,
}

impl NotificationSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn notify(&self, text: impl Into<String>) {
        if self.tx.send(text.into()).is_err() {
            warn!("Notification dispatcher stopped, message dropped");
        }
    }
}

/// Drain the channel into `notifier` until every sink is dropped
pub fn spawn_dispatcher(
    mut rx: mpsc::UnboundedReceiver<String>,
    notifier: Arc<dyn Notifier>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if let Err(e) = notifier.send(&text).await {
                error!("Failed to deliver notification: {}", e);
            }
        }
        debug!("Notification dispatcher exiting");
    })
}

pub fn format_breakout_alert(title: &str, candidate: &TradeCandidate, at: chrono::NaiveTime) -> String {
    let record = candidate.to_record();
    format!(
        "<b>{}</b>\n\n<b>{}</b>\nSignal: {}\nPrice: {}\nEntry: {}\nSL: {}\nQty: {}\nRisk: {}\n{}",
        title,
        record.stock_name,
        record.signal,
        record.price,
        record.entry,
        record.stop,
        record.quantity,
        record.expected_loss,
        at.format("%H:%M:%S")
    )
}

pub fn format_scan_complete(title: &str, instruments: usize) -> String {
    format!(
        "<b>{}</b> scan complete: {} instruments ranged, breakout tracking enabled",
        title, instruments
    )
}

pub fn format_placement_failed(candidate: &TradeCandidate, reason: &str) -> String {
    format!(
        "Order placement failed | <b>{}</b> {} x{}\n{}",
        candidate.name, candidate.side, candidate.quantity, reason
    )
}

/// One line per terminal lifecycle phase; `None` for non-terminal phases
pub fn format_order_outcome(name: &str, order_id: &str, phase: LifecyclePhase) -> Option<String> {
    let outcome = match phase {
        LifecyclePhase::Rejected => "Order REJECTED".to_string(),
        LifecyclePhase::Cancelled => "Order CANCELLED".to_string(),
        LifecyclePhase::Exited(ExitReason::TimeoutCancelled) => {
            "Not filled in time, entry cancelled".to_string()
        }
        LifecyclePhase::Exited(ExitReason::StopHit) => "STOP LOSS HIT".to_string(),
        LifecyclePhase::Exited(ExitReason::TargetHit) => "TARGET HIT".to_string(),
        LifecyclePhase::Exited(reason) => format!("Exited: {}", reason),
        LifecyclePhase::Stopped => "Monitoring stopped; legs remain with the broker".to_string(),
        LifecyclePhase::Submitted | LifecyclePhase::Filled | LifecyclePhase::Monitoring => {
            return None
        }
    };
    Some(format!("{} | <b>{}</b> ({})", outcome, name, order_id))
}
