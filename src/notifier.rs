use crate::classifier::ClusterAlert;
use crate::decision::Decision;
use crate::types::{Candidate, Direction};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::{info, warn};

/// Fire-and-forget message sink. Implementations must swallow their own
/// delivery errors; nothing here may abort the trading loop.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &str);

    async fn notify_startup(&self, symbol: &str, mode: &str) {
        let msg = format!(
            "🟢 <b>Cluster Bot Started</b>\n\nSymbol: {}\nMode: {}\n\nWaiting for cluster signals...",
            symbol, mode
        );
        self.send(&msg).await;
    }

    async fn notify_shutdown(&self, symbol: &str) {
        self.send(&format!("🔴 <b>Cluster Bot Stopped</b>\n\nSymbol: {}", symbol)).await;
    }

    async fn notify_cluster(&self, symbol: &str, alert: &ClusterAlert) {
        let msg = format!(
            "📊 <b>Cluster</b> {}\n\nBucket: {}\nBuy: {}\nSell: {}",
            symbol, alert.bucket_price, alert.buy_volume, alert.sell_volume
        );
        self.send(&msg).await;
    }

    async fn notify_signal(&self, candidate: &Candidate) {
        let msg = format!(
            "🎯 <b>Signal Detected</b>\n\n{}\nSignal: {}\nBucket: {}\nBuy/Sell: {} / {}\nBuy ratio: {}%\n\nAsking oracle...",
            candidate.symbol,
            candidate.signal,
            candidate.bucket_price,
            candidate.buy_volume,
            candidate.sell_volume,
            candidate.buy_ratio.round_dp(1)
        );
        self.send(&msg).await;
    }

    async fn notify_decision(&self, symbol: &str, decision: Decision) {
        self.send(&format!("🤖 Oracle on {}: <b>{}</b>", symbol, decision)).await;
    }

    async fn notify_blocked(&self, symbol: &str, reason: &str) {
        let msg = format!("🛑 <b>Trade Blocked</b>\n\n{}\nReason: {}", symbol, reason);
        self.send(&msg).await;
    }

    async fn notify_trade(&self, symbol: &str, direction: Direction, usd: Decimal, is_mock: bool) {
        let header = if is_mock {
            "📝 <b>MOCK Position Opened</b>"
        } else {
            "✅ <b>LIVE Position Opened</b>"
        };
        let msg = format!("{}\n\n{}\nDirection: {}\nSize: ${}", header, symbol, direction, usd);
        self.send(&msg).await;
    }

    async fn notify_closed(&self, symbol: &str, direction: Direction, held: Duration, reason: &str) {
        let msg = format!(
            "📕 <b>Position Closed</b>\n\n{}\nDirection: {}\nHeld: {}s\nReason: {}",
            symbol,
            direction,
            held.as_secs(),
            reason
        );
        self.send(&msg).await;
    }

    async fn notify_failed(&self, symbol: &str, error: &str) {
        let msg = format!("❌ <b>Order Failed</b>\n\n{}\nError: {}", symbol, error);
        self.send(&msg).await;
    }

    /// Degraded-but-running conditions: reconnects, cold caches, and so on.
    async fn notify_degraded(&self, what: &str) {
        self.send(&format!("⚠️ {}", what)).await;
    }
}

/// Telegram bot notifier. Disabled (log only) when token or chat id is empty.
pub struct TelegramNotifier {
    bot_token: String,
    chat_id: String,
    client: Client,
    enabled: bool,
}

impl TelegramNotifier {
    pub fn new(bot_token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        let bot_token = bot_token.into();
        let chat_id = chat_id.into();
        let enabled = !bot_token.is_empty() && !chat_id.is_empty();

        if !enabled {
            warn!("Telegram notifications disabled (TELEGRAM_BOT_TOKEN or TELEGRAM_CHAT_ID not set)");
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self { bot_token, chat_id, client, enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, message: &str) {
        if !self.enabled {
            info!(target: "notify", "{}", message);
            return;
        }

        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": self.chat_id,
                "text": message,
                "parse_mode": "HTML"
            }))
            .send()
            .await;

        match response {
            Ok(resp) if !resp.status().is_success() => {
                warn!(status = %resp.status(), "Telegram rejected notification");
            }
            Ok(_) => {}
            // Don't fail the bot if Telegram fails
            Err(e) => warn!(error = %e, "Failed to send Telegram notification"),
        }
    }
}
