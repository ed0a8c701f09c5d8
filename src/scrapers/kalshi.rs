//! Kalshi scraper (binary-quote provider).
//!
//! One listing request returns every open market with cents-denominated
//! yes quotes; we derive yes/no probabilities and detect combination
//! markets heuristically.

use super::{cents_quote, field_f64, field_str, spread_pp_from_quotes, ProviderScraper};
use crate::models::{normalize_probability, NormalizedCategory, OutcomeSnapshot, Provider};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const KALSHI_API_BASE: &str = "https://api.elections.kalshi.com/trade-api/v2";
const LISTING_LIMIT: usize = 1000;

/// Comma-delimited "yes …/no …" titles shorter than this are assumed to be
/// ordinary prose, not combo legs.
const COMBO_TITLE_MIN_LEN: usize = 60;

pub struct KalshiScraper {
    client: reqwest::Client,
}

impl KalshiScraper {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProviderScraper for KalshiScraper {
    fn name(&self) -> Provider {
        Provider::Kalshi
    }

    async fn fetch_snapshots(&self, ts_minute: i64) -> Result<Vec<OutcomeSnapshot>> {
        let body: Value = self
            .client
            .get(format!("{}/markets", KALSHI_API_BASE))
            .timeout(Duration::from_secs(10))
            .query(&[("status", "open"), ("limit", &LISTING_LIMIT.to_string())])
            .send()
            .await
            .context("kalshi markets request failed")?
            .error_for_status()
            .context("kalshi markets status")?
            .json()
            .await
            .context("kalshi markets json parse")?;

        let markets = body
            .get("markets")
            .and_then(Value::as_array)
            .context("kalshi payload missing markets array")?;

        let mut snapshots = Vec::with_capacity(markets.len() * 2);
        for market in markets {
            match parse_market(market, ts_minute) {
                Some(mut pair) => snapshots.append(&mut pair),
                None => debug!(
                    ticker = field_str(market, "ticker").unwrap_or("?"),
                    "kalshi market skipped (no usable quote)"
                ),
            }
        }

        Ok(snapshots)
    }
}

/// Derive yes/no snapshots for one listed market; None when no usable
/// probability can be derived.
fn parse_market(market: &Value, ts_minute: i64) -> Option<Vec<OutcomeSnapshot>> {
    let ticker = field_str(market, "ticker")?.to_string();
    let raw_title = field_str(market, "title").unwrap_or(&ticker).to_string();
    let raw_category = field_str(market, "category").map(str::to_string);
    let status = field_str(market, "status").unwrap_or("open").to_string();

    // Mid of yes bid/ask when both are real quotes (0 and 100 are
    // absence sentinels), else last trade.
    let bid_cents = cents_quote(field_f64(market, "yes_bid"));
    let ask_cents = cents_quote(field_f64(market, "yes_ask"));
    let p_yes = match (bid_cents, ask_cents) {
        (Some(b), Some(a)) => (b + a) / 2.0 / 100.0,
        _ => field_f64(market, "last_price")? / 100.0,
    };
    let p_yes = normalize_probability(p_yes);

    let spread_pp = spread_pp_from_quotes(
        bid_cents.map(|c| c / 100.0),
        ask_cents.map(|c| c / 100.0),
    );

    let volume_24h_usd = field_f64(market, "volume_24h").unwrap_or(0.0);
    // Kalshi reports liquidity in cents.
    let liquidity_usd = field_f64(market, "liquidity").unwrap_or(0.0) / 100.0;

    let combo_legs = detect_combo_legs(market, &ticker, &raw_title);
    let market_title = match &combo_legs {
        Some(legs) => combo_summary(legs),
        None => raw_title.clone(),
    };

    let mut metadata = json!({
        "event_ticker": field_str(market, "event_ticker"),
    });
    if let Some(legs) = &combo_legs {
        metadata["original_title"] = Value::String(raw_title.clone());
        metadata["combo_legs"] = json!(legs);
    }

    let normalized_category = raw_category
        .as_deref()
        .map(NormalizedCategory::from_raw)
        .unwrap_or(NormalizedCategory::Other);

    let yes_label = field_str(market, "yes_sub_title")
        .filter(|s| !s.is_empty())
        .unwrap_or("Yes")
        .to_string();

    let base = OutcomeSnapshot {
        ts_minute,
        provider: Provider::Kalshi,
        market_id: ticker,
        outcome_id: "yes".to_string(),
        outcome_label: yes_label,
        market_title,
        raw_category,
        normalized_category,
        status,
        metadata,
        probability: p_yes,
        spread_pp,
        volume_24h_usd,
        liquidity_usd,
    };

    let mut no = base.clone();
    no.outcome_id = "no".to_string();
    no.outcome_label = "No".to_string();
    no.probability = 1.0 - p_yes;

    Some(vec![base, no])
}

/// Combination markets are flagged by an explicit legs field, a combo
/// ticker, or a long comma-delimited "yes …/no …" title.
fn detect_combo_legs(market: &Value, ticker: &str, title: &str) -> Option<Vec<String>> {
    if let Some(legs) = market.get("selected_legs").and_then(Value::as_array) {
        let parsed: Vec<String> = legs
            .iter()
            .filter_map(|leg| {
                leg.as_str()
                    .map(str::to_string)
                    .or_else(|| field_str(leg, "title").map(str::to_string))
            })
            .collect();
        if parsed.len() >= 2 {
            return Some(parsed);
        }
    }

    let ticker_upper = ticker.to_ascii_uppercase();
    let combo_ticker = ticker_upper.contains("COMBO") || ticker_upper.starts_with("KXPARLAY");

    if combo_ticker || title.len() > COMBO_TITLE_MIN_LEN {
        let segments: Vec<String> = title
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        let all_legs = segments.len() >= 2
            && segments.iter().all(|s| {
                let lower = s.to_ascii_lowercase();
                lower.starts_with("yes ") || lower.starts_with("no ")
            });
        if all_legs {
            return Some(segments);
        }
        if combo_ticker && segments.len() >= 2 {
            return Some(segments);
        }
    }

    None
}

fn combo_summary(legs: &[String]) -> String {
    match legs.split_first() {
        Some((head, rest)) if !rest.is_empty() => {
            format!("{} (+{} legs)", head, rest.len())
        }
        Some((head, _)) => head.clone(),
        None => String::new(),
    }
}
