//! Environment-driven configuration.
//!
//! Everything is read once at startup; missing values fall back to
//! development defaults so the worker can run against a local database
//! with no environment at all.

use std::env;

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_flag(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
        .unwrap_or(default)
}

/// Which chat transport variant to use for alert delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelegramMode {
    Bot,
    User,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub worker_interval_ms: u64,
    pub api_port: u16,

    // Alert gating
    pub min_liquidity_usd: f64,
    pub max_spread_pp: f64,
    pub alert_cooldown_minutes: i64,

    // Optional providers
    pub opinion_enabled: bool,
    pub opinion_api_base: Option<String>,
    pub opinion_api_key: Option<String>,

    // Chat transport
    pub telegram_mode: TelegramMode,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub telegram_user_api_base: Option<String>,
    pub telegram_user_token: Option<String>,

    // Anchor model artifact
    pub anchor_model_path: String,
}

impl Config {
    pub fn from_env() -> Self {
        let telegram_mode = match env_string("TELEGRAM_MODE", "bot").to_ascii_lowercase().as_str() {
            "user" => TelegramMode::User,
            _ => TelegramMode::Bot,
        };

        Self {
            database_path: env_string("DATABASE_PATH", "radarbot.db"),
            worker_interval_ms: env_parse("WORKER_INTERVAL_MS", 60_000u64),
            api_port: env_parse("API_PORT", 8080u16),

            min_liquidity_usd: env_parse("MIN_LIQUIDITY_USD", 5_000.0f64),
            max_spread_pp: env_parse("MAX_SPREAD_PP", 15.0f64),
            alert_cooldown_minutes: env_parse("ALERT_COOLDOWN_MINUTES", 30i64),

            opinion_enabled: env_flag("OPINION_ENABLED", false),
            opinion_api_base: env_opt("OPINION_API_BASE"),
            opinion_api_key: env_opt("OPINION_API_KEY"),

            telegram_mode,
            telegram_bot_token: env_opt("TELEGRAM_BOT_TOKEN"),
            telegram_chat_id: env_opt("TELEGRAM_CHAT_ID"),
            telegram_user_api_base: env_opt("TELEGRAM_USER_API_BASE"),
            telegram_user_token: env_opt("TELEGRAM_USER_TOKEN"),

            anchor_model_path: env_string("ANCHOR_MODEL_PATH", "anchor_model.json"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "radarbot.db".to_string(),
            worker_interval_ms: 60_000,
            api_port: 8080,
            min_liquidity_usd: 5_000.0,
            max_spread_pp: 15.0,
            alert_cooldown_minutes: 30,
            opinion_enabled: false,
            opinion_api_base: None,
            opinion_api_key: None,
            telegram_mode: TelegramMode::Bot,
            telegram_bot_token: None,
            telegram_chat_id: None,
            telegram_user_api_base: None,
            telegram_user_token: None,
            anchor_model_path: "anchor_model.json".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.worker_interval_ms, 60_000);
        assert_eq!(cfg.alert_cooldown_minutes, 30);
        assert_eq!(cfg.min_liquidity_usd, 5_000.0);
        assert_eq!(cfg.max_spread_pp, 15.0);
        assert!(!cfg.opinion_enabled);
    }
}
