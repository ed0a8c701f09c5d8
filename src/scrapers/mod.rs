//! Provider scrapers: fetch and normalize current outcome quotes into
//! uniform per-minute snapshots.

pub mod kalshi;
pub mod opinion;
pub mod polymarket;
pub mod spot_feed;

pub use kalshi::KalshiScraper;
pub use opinion::OpinionScraper;
pub use polymarket::PolymarketScraper;
pub use spot_feed::{SpotPriceFeed, SpotSignals};

use crate::models::{OutcomeSnapshot, Provider};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// Capability set every provider adapter implements.
#[async_trait]
pub trait ProviderScraper: Send + Sync {
    fn name(&self) -> Provider;

    /// Adapters missing required credentials/flags report false and are
    /// skipped for the cycle.
    fn enabled(&self) -> bool {
        true
    }

    /// Fetch the provider's current quotes, stamped with the cycle tick.
    async fn fetch_snapshots(&self, ts_minute: i64) -> Result<Vec<OutcomeSnapshot>>;
}

/// Run every enabled scraper concurrently. A failed scraper contributes an
/// empty batch; it never aborts the others.
pub async fn fetch_all(
    scrapers: &[Arc<dyn ProviderScraper>],
    ts_minute: i64,
) -> Vec<OutcomeSnapshot> {
    let futures: Vec<_> = scrapers
        .iter()
        .filter(|s| s.enabled())
        .map(|s| {
            let scraper = s.clone();
            async move {
                match scraper.fetch_snapshots(ts_minute).await {
                    Ok(snaps) => {
                        info!(
                            provider = scraper.name().as_str(),
                            count = snaps.len(),
                            "scraper fetch complete"
                        );
                        snaps
                    }
                    Err(e) => {
                        warn!(
                            provider = scraper.name().as_str(),
                            error = %e,
                            "scraper failed, yielding empty batch"
                        );
                        Vec::new()
                    }
                }
            }
        })
        .collect();

    futures_util::future::join_all(futures)
        .await
        .into_iter()
        .flatten()
        .collect()
}

/// Lenient numeric extraction: providers deliver numbers as numbers or as
/// strings, and sometimes as empty strings.
pub fn json_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if !s.is_empty() => s.parse::<f64>().ok(),
        _ => None,
    }
}

pub fn field_f64(obj: &Value, key: &str) -> Option<f64> {
    obj.get(key).and_then(json_f64)
}

pub fn field_str<'a>(obj: &'a Value, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(Value::as_str)
}

/// Some APIs return JSON arrays as a string (e.g. "[\"Yes\",\"No\"]").
pub fn json_string_vec(v: &Value) -> Vec<String> {
    match v {
        Value::Array(arr) => arr
            .iter()
            .filter_map(|x| match x {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Value::String(s) => serde_json::from_str::<Vec<String>>(s).unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// Percentage-point spread between best bid and best ask (probabilities in
/// [0,1]); None when either side is missing.
pub fn spread_pp_from_quotes(bid: Option<f64>, ask: Option<f64>) -> Option<f64> {
    match (bid, ask) {
        (Some(b), Some(a)) => Some((a - b).abs() * 100.0),
        _ => None,
    }
}

/// Quote-based providers publish 0/100 (in cents) as absence-of-quote
/// sentinels; map those to missing before any spread math.
pub fn cents_quote(raw: Option<f64>) -> Option<f64> {
    raw.filter(|c| *c > 0.0 && *c < 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lenient_numbers() {
        assert_eq!(json_f64(&json!(1.5)), Some(1.5));
        assert_eq!(json_f64(&json!("2.25")), Some(2.25));
        assert_eq!(json_f64(&json!("")), None);
        assert_eq!(json_f64(&json!(null)), None);
        assert_eq!(json_f64(&json!({"a": 1})), None);
    }

    #[test]
    fn string_vec_accepts_arrays_and_embedded_json() {
        assert_eq!(
            json_string_vec(&json!(["Yes", "No"])),
            vec!["Yes".to_string(), "No".to_string()]
        );
        assert_eq!(
            json_string_vec(&json!("[\"Yes\",\"No\"]")),
            vec!["Yes".to_string(), "No".to_string()]
        );
        assert!(json_string_vec(&json!(42)).is_empty());
    }

    #[test]
    fn spread_needs_both_sides() {
        assert_eq!(spread_pp_from_quotes(Some(0.25), Some(0.75)), Some(50.0));
        let near = spread_pp_from_quotes(Some(0.40), Some(0.44)).unwrap();
        assert!((near - 4.0).abs() < 1e-9);
        assert_eq!(spread_pp_from_quotes(Some(0.40), None), None);
        assert_eq!(spread_pp_from_quotes(None, None), None);
    }

    #[test]
    fn cents_boundaries_are_missing_quotes() {
        assert_eq!(cents_quote(Some(0.0)), None);
        assert_eq!(cents_quote(Some(100.0)), None);
        assert_eq!(cents_quote(Some(42.0)), Some(42.0));
        assert_eq!(cents_quote(None), None);
    }
}
