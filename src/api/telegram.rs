//! Telegram bot notifier for operator alerts.

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;

use super::gateway::{GatewayError, GatewayResult};

const TELEGRAM_API: &str = "https://api.telegram.org";

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

/// Sends plain-text messages to one chat.
pub struct TelegramNotifier {
    http: Client,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: &str, chat_id: &str) -> GatewayResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| GatewayError::Network(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            bot_token: bot_token.to_string(),
            chat_id: chat_id.to_string(),
        })
    }

    /// Build a notifier only when both token and chat id are present.
    pub fn from_parts(bot_token: &str, chat_id: &str) -> Option<GatewayResult<Self>> {
        if bot_token.trim().is_empty() || chat_id.trim().is_empty() {
            return None;
        }
        Some(Self::new(bot_token, chat_id))
    }

    pub async fn send(&self, text: &str) -> GatewayResult<()> {
        let url = format!("{}/bot{}/sendMessage", TELEGRAM_API, self.bot_token);
        let resp = self
            .http
            .post(&url)
            .json(&SendMessage {
                chat_id: &self.chat_id,
                text,
            })
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Notify(format!("{status} - {body}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_parts_requires_token_and_chat() {
        assert!(TelegramNotifier::from_parts("", "123").is_none());
        assert!(TelegramNotifier::from_parts("token", " ").is_none());
        assert!(TelegramNotifier::from_parts("token", "123").is_some());
    }
}
