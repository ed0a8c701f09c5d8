//! Telegram delivery for alert messages.
//!
//! Two transport variants share the contract: the bot API (token + chat
//! id) and a user-session HTTP bridge (base url + token). 429 responses
//! are retried after the server-supplied delay; any other failure
//! surfaces to the alerter, which then leaves cooldown state untouched.

use super::ChatDispatcher;
use crate::config::{Config, TelegramMode};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

const TELEGRAM_BOT_API_BASE: &str = "https://api.telegram.org";
const MAX_RATE_LIMIT_RETRIES: usize = 2;

pub enum TelegramDispatcher {
    Bot {
        client: reqwest::Client,
        token: String,
        chat_id: String,
    },
    User {
        client: reqwest::Client,
        base_url: String,
        token: String,
    },
}

impl TelegramDispatcher {
    /// Build the variant selected by config; None when that variant is not
    /// fully configured (alerting disabled).
    pub fn from_config(client: reqwest::Client, config: &Config) -> Option<Self> {
        match config.telegram_mode {
            TelegramMode::Bot => {
                let token = config.telegram_bot_token.clone()?;
                let chat_id = config.telegram_chat_id.clone()?;
                info!("telegram dispatcher configured (bot mode)");
                Some(TelegramDispatcher::Bot {
                    client,
                    token,
                    chat_id,
                })
            }
            TelegramMode::User => {
                let base_url = config.telegram_user_api_base.clone()?;
                let token = config.telegram_user_token.clone()?;
                info!("telegram dispatcher configured (user mode)");
                Some(TelegramDispatcher::User {
                    client,
                    base_url,
                    token,
                })
            }
        }
    }

    async fn post_once(&self, body: &str) -> Result<reqwest::Response> {
        let resp = match self {
            TelegramDispatcher::Bot {
                client,
                token,
                chat_id,
            } => {
                client
                    .post(format!("{}/bot{}/sendMessage", TELEGRAM_BOT_API_BASE, token))
                    .timeout(Duration::from_secs(10))
                    .json(&json!({
                        "chat_id": chat_id,
                        "text": body,
                        "disable_web_page_preview": true,
                    }))
                    .send()
                    .await
            }
            TelegramDispatcher::User {
                client,
                base_url,
                token,
            } => {
                client
                    .post(format!("{}/messages", base_url.trim_end_matches('/')))
                    .timeout(Duration::from_secs(10))
                    .bearer_auth(token)
                    .json(&json!({ "text": body }))
                    .send()
                    .await
            }
        };
        resp.context("telegram request failed")
    }
}

#[async_trait]
impl ChatDispatcher for TelegramDispatcher {
    async fn send_text(&self, body: &str) -> Result<()> {
        for attempt in 0..=MAX_RATE_LIMIT_RETRIES {
            let resp = self.post_once(body).await?;
            let status = resp.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                if attempt == MAX_RATE_LIMIT_RETRIES {
                    bail!("telegram rate limited after {} retries", attempt);
                }
                // Read the header before the body consumes the response.
                let header_delay = resp
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok());
                let payload: Value = resp.json().await.unwrap_or(Value::Null);
                let delay = header_delay.unwrap_or_else(|| retry_after_seconds(&payload));
                debug!(delay_s = delay, "telegram 429, honoring retry_after");
                tokio::time::sleep(Duration::from_secs(delay)).await;
                continue;
            }

            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                bail!("telegram send failed {}: {}", status, text);
            }

            return Ok(());
        }
        unreachable!("retry loop always returns or bails")
    }
}

/// Telegram also reports the backoff inside the error payload.
fn retry_after_seconds(payload: &Value) -> u64 {
    payload
        .pointer("/parameters/retry_after")
        .and_then(Value::as_u64)
        .unwrap_or(3)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_requires_full_credentials() {
        let client = reqwest::Client::new();

        let mut config = Config::default();
        assert!(TelegramDispatcher::from_config(client.clone(), &config).is_none());

        config.telegram_bot_token = Some("123:abc".to_string());
        assert!(TelegramDispatcher::from_config(client.clone(), &config).is_none());

        config.telegram_chat_id = Some("-100123".to_string());
        assert!(matches!(
            TelegramDispatcher::from_config(client.clone(), &config),
            Some(TelegramDispatcher::Bot { .. })
        ));

        config.telegram_mode = TelegramMode::User;
        assert!(TelegramDispatcher::from_config(client.clone(), &config).is_none());
        config.telegram_user_api_base = Some("https://bridge.local".to_string());
        config.telegram_user_token = Some("tok".to_string());
        assert!(matches!(
            TelegramDispatcher::from_config(client, &config),
            Some(TelegramDispatcher::User { .. })
        ));
    }

    #[test]
    fn retry_after_parses_payload() {
        let payload = json!({"ok": false, "parameters": {"retry_after": 17}});
        assert_eq!(retry_after_seconds(&payload), 17);
        assert_eq!(retry_after_seconds(&Value::Null), 3);
    }
}
