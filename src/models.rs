//! Core domain types shared across the pipeline.

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Prediction-market providers we scrape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Polymarket,
    Kalshi,
    Opinion,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Polymarket => "polymarket",
            Provider::Kalshi => "kalshi",
            Provider::Opinion => "opinion",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "polymarket" => Some(Provider::Polymarket),
            "kalshi" => Some(Provider::Kalshi),
            "opinion" => Some(Provider::Opinion),
            _ => None,
        }
    }
}

/// Coarse market category used by the classifier and the read API filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizedCategory {
    Crypto,
    Politics,
    Policy,
    Sports,
    Macro,
    Other,
}

impl NormalizedCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            NormalizedCategory::Crypto => "crypto",
            NormalizedCategory::Politics => "politics",
            NormalizedCategory::Policy => "policy",
            NormalizedCategory::Sports => "sports",
            NormalizedCategory::Macro => "macro",
            NormalizedCategory::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "crypto" => Some(NormalizedCategory::Crypto),
            "politics" => Some(NormalizedCategory::Politics),
            "policy" => Some(NormalizedCategory::Policy),
            "sports" => Some(NormalizedCategory::Sports),
            "macro" => Some(NormalizedCategory::Macro),
            "other" => Some(NormalizedCategory::Other),
            _ => None,
        }
    }

    /// Best-effort mapping from a provider's raw category string.
    pub fn from_raw(raw: &str) -> Self {
        let lower = raw.to_ascii_lowercase();
        if lower.contains("crypto")
            || lower.contains("bitcoin")
            || lower.contains("ethereum")
            || lower.contains("defi")
        {
            NormalizedCategory::Crypto
        } else if lower.contains("politic") || lower.contains("election") {
            NormalizedCategory::Politics
        } else if lower.contains("policy")
            || lower.contains("regulat")
            || lower.contains("law")
            || lower.contains("court")
        {
            NormalizedCategory::Policy
        } else if lower.contains("sport")
            || lower.contains("nba")
            || lower.contains("nfl")
            || lower.contains("mlb")
            || lower.contains("soccer")
            || lower.contains("football")
        {
            NormalizedCategory::Sports
        } else if lower.contains("econom")
            || lower.contains("macro")
            || lower.contains("fed")
            || lower.contains("inflation")
            || lower.contains("rates")
        {
            NormalizedCategory::Macro
        } else {
            NormalizedCategory::Other
        }
    }
}

/// What fundamentally drives a market's probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorType {
    SpotPriceAnchored,
    LiveScoreAnchored,
    ScheduledMacroRelease,
    PolicyRegulatoryDecision,
    SportsTeamNews,
    CryptoNewsSecurity,
    OtherUnknown,
}

impl AnchorType {
    pub const ALL: [AnchorType; 7] = [
        AnchorType::SpotPriceAnchored,
        AnchorType::LiveScoreAnchored,
        AnchorType::ScheduledMacroRelease,
        AnchorType::PolicyRegulatoryDecision,
        AnchorType::SportsTeamNews,
        AnchorType::CryptoNewsSecurity,
        AnchorType::OtherUnknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnchorType::SpotPriceAnchored => "spot_price_anchored",
            AnchorType::LiveScoreAnchored => "live_score_anchored",
            AnchorType::ScheduledMacroRelease => "scheduled_macro_release",
            AnchorType::PolicyRegulatoryDecision => "policy_regulatory_decision",
            AnchorType::SportsTeamNews => "sports_team_news",
            AnchorType::CryptoNewsSecurity => "crypto_news_security",
            AnchorType::OtherUnknown => "other_unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        AnchorType::ALL.iter().copied().find(|a| a.as_str() == s)
    }

    /// Anchors tracking a fast public reference cannot hide private
    /// information; everything else can.
    pub fn insider_possible(&self) -> bool {
        !matches!(
            self,
            AnchorType::SpotPriceAnchored | AnchorType::LiveScoreAnchored
        )
    }
}

/// Outcome move classification labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationLabel {
    OpaqueInfoSensitive,
    ExogenousArbitrage,
    Unclear,
}

impl ClassificationLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassificationLabel::OpaqueInfoSensitive => "opaque_info_sensitive",
            ClassificationLabel::ExogenousArbitrage => "exogenous_arbitrage",
            ClassificationLabel::Unclear => "unclear",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "opaque_info_sensitive" => Some(ClassificationLabel::OpaqueInfoSensitive),
            "exogenous_arbitrage" => Some(ClassificationLabel::ExogenousArbitrage),
            "unclear" => Some(ClassificationLabel::Unclear),
            _ => None,
        }
    }
}

/// The fixed lookback window set. Every stage (deltas, classifier, alerter,
/// read API) shares this one set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Window {
    M1,
    M5,
    M10,
    M30,
    H1,
    H6,
    H12,
    H24,
}

impl Window {
    pub const ALL: [Window; 8] = [
        Window::M1,
        Window::M5,
        Window::M10,
        Window::M30,
        Window::H1,
        Window::H6,
        Window::H12,
        Window::H24,
    ];

    pub fn minutes(&self) -> i64 {
        match self {
            Window::M1 => 1,
            Window::M5 => 5,
            Window::M10 => 10,
            Window::M30 => 30,
            Window::H1 => 60,
            Window::H6 => 360,
            Window::H12 => 720,
            Window::H24 => 1440,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Window::M1 => "1m",
            Window::M5 => "5m",
            Window::M10 => "10m",
            Window::M30 => "30m",
            Window::H1 => "1h",
            Window::H6 => "6h",
            Window::H12 => "12h",
            Window::H24 => "24h",
        }
    }

    /// Column holding this window's delta in the deltas table.
    pub fn column(&self) -> &'static str {
        match self {
            Window::M1 => "delta_1m",
            Window::M5 => "delta_5m",
            Window::M10 => "delta_10m",
            Window::M30 => "delta_30m",
            Window::H1 => "delta_1h",
            Window::H6 => "delta_6h",
            Window::H12 => "delta_12h",
            Window::H24 => "delta_24h",
        }
    }

    /// Absolute pp move required before this window can trigger an alert.
    pub fn alert_threshold_pp(&self) -> f64 {
        match self {
            Window::M1 => 6.0,
            Window::M5 => 8.0,
            Window::M10 => 10.0,
            Window::M30 => 14.0,
            Window::H1 => 18.0,
            Window::H6 => 24.0,
            Window::H12 => 30.0,
            Window::H24 => 38.0,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Window::ALL.iter().copied().find(|w| w.as_str() == s)
    }

    pub fn index(&self) -> usize {
        Window::ALL.iter().position(|w| w == self).unwrap_or(0)
    }
}

/// One normalized outcome quote emitted by a provider scraper for a tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeSnapshot {
    pub ts_minute: i64,
    pub provider: Provider,
    pub market_id: String,
    pub outcome_id: String,
    pub outcome_label: String,
    pub market_title: String,
    pub raw_category: Option<String>,
    pub normalized_category: NormalizedCategory,
    pub status: String,
    /// Provider-specific bag (url slug, combo legs, event ticker).
    pub metadata: Value,
    pub probability: f64,
    pub spread_pp: Option<f64>,
    pub volume_24h_usd: f64,
    pub liquidity_usd: f64,
}

/// Per-market anchor profile produced by the profiler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketProfile {
    pub provider: Provider,
    pub market_id: String,
    pub anchor_type: AnchorType,
    pub insider_possible: bool,
    pub confidence: Option<f64>,
    pub model_version: String,
    pub updated_at: i64,
}

/// Per-outcome move classification at a tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub ts_minute: i64,
    pub provider: Provider,
    pub market_id: String,
    pub outcome_id: String,
    pub opaque_score: f64,
    pub exogenous_score: f64,
    pub label: ClassificationLabel,
    pub reasons: Vec<String>,
    pub model_version: String,
}

/// Per-outcome windowed probability changes at a tick, in pp.
#[derive(Debug, Clone, Default)]
pub struct DeltaSet {
    values: [Option<f64>; Window::ALL.len()],
}

impl DeltaSet {
    pub fn get(&self, w: Window) -> Option<f64> {
        self.values[w.index()]
    }

    pub fn set(&mut self, w: Window, v: Option<f64>) {
        self.values[w.index()] = v;
    }
}

/// Truncate a unix timestamp to its minute boundary (UTC).
pub fn truncate_to_minute(ts_secs: i64) -> i64 {
    ts_secs - ts_secs.rem_euclid(60)
}

/// Current tick: wall clock truncated to the minute.
pub fn current_tick() -> i64 {
    truncate_to_minute(Utc::now().timestamp())
}

/// Format a tick for logs and alert messages.
pub fn format_tick(ts_minute: i64) -> String {
    match Utc.timestamp_opt(ts_minute, 0) {
        chrono::LocalResult::Single(dt) => dt.format("%Y-%m-%d %H:%M UTC").to_string(),
        _ => ts_minute.to_string(),
    }
}

/// Round to 2 decimals, half away from zero.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Canonicalize a raw probability: percents above 1 are scaled down, then
/// the value is clamped into [0,1].
pub fn normalize_probability(raw: f64) -> f64 {
    let p = if raw > 1.0 { raw / 100.0 } else { raw };
    p.clamp(0.0, 1.0)
}
