//! Polymarket scraper (order-book provider).
//!
//! One Gamma listing request, then per-token CLOB order books with bounded
//! concurrency. Liquidity is estimated from visible depth near the touch,
//! falling back to the market-level liquidity figure when a book fetch
//! fails.

use super::{spread_pp_from_quotes, ProviderScraper};
use crate::models::{normalize_probability, NormalizedCategory, OutcomeSnapshot, Provider};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

const GAMMA_API_BASE: &str = "https://gamma-api.polymarket.com";
const CLOB_API_BASE: &str = "https://clob.polymarket.com";
const LISTING_LIMIT: usize = 500;
const BOOK_CONCURRENCY: usize = 16;
/// Depth levels per side summed into the liquidity estimate.
const DEPTH_LEVELS: usize = 20;

#[derive(Debug, Clone, Deserialize)]
pub struct GammaMarket {
    #[serde(default)]
    pub id: Option<String>,
    pub slug: String,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub closed: Option<bool>,
    #[serde(default, deserialize_with = "de_string_f64_opt")]
    pub volume24hr: Option<f64>,
    #[serde(default, deserialize_with = "de_string_f64_opt")]
    pub liquidity: Option<f64>,
    #[serde(default, deserialize_with = "de_string_vec")]
    pub outcomes: Vec<String>,
    #[serde(rename = "outcomePrices", default, deserialize_with = "de_string_vec")]
    pub outcome_prices: Vec<String>,
    #[serde(rename = "clobTokenIds", default, deserialize_with = "de_string_vec")]
    pub clob_token_ids: Vec<String>,
}

fn de_string_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    match v {
        Value::Array(arr) => Ok(arr
            .into_iter()
            .filter_map(|x| match x {
                Value::String(s) => Some(s),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect()),
        // Gamma sometimes returns JSON arrays as a string (e.g. "[\"Yes\",\"No\"]").
        Value::String(s) => Ok(serde_json::from_str::<Vec<String>>(&s).unwrap_or_default()),
        _ => Ok(Vec::new()),
    }
}

fn de_string_f64_opt<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    Ok(super::json_f64(&v))
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderBook {
    #[serde(default)]
    pub bids: Vec<BookLevel>,
    #[serde(default)]
    pub asks: Vec<BookLevel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookLevel {
    #[serde(deserialize_with = "de_f64")]
    pub price: f64,
    #[serde(deserialize_with = "de_f64")]
    pub size: f64,
}

fn de_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    super::json_f64(&v).ok_or_else(|| serde::de::Error::custom("expected string or number"))
}

/// Best quotes and near-touch depth derived from one token's book.
#[derive(Debug, Clone, Copy)]
pub struct BookSummary {
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub depth_usd: f64,
}

pub fn summarize_book(book: &OrderBook) -> BookSummary {
    let mut bids: Vec<&BookLevel> = book.bids.iter().filter(|l| l.price > 0.0).collect();
    let mut asks: Vec<&BookLevel> = book.asks.iter().filter(|l| l.price > 0.0).collect();
    bids.sort_by(|a, b| b.price.total_cmp(&a.price));
    asks.sort_by(|a, b| a.price.total_cmp(&b.price));

    let depth_usd = bids
        .iter()
        .take(DEPTH_LEVELS)
        .chain(asks.iter().take(DEPTH_LEVELS))
        .map(|l| l.price * l.size)
        .sum();

    BookSummary {
        best_bid: bids.first().map(|l| l.price),
        best_ask: asks.first().map(|l| l.price),
        depth_usd,
    }
}

pub struct PolymarketScraper {
    client: reqwest::Client,
}

impl PolymarketScraper {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn fetch_book(&self, token_id: &str) -> Result<OrderBook> {
        let book: OrderBook = self
            .client
            .get(format!("{}/book", CLOB_API_BASE))
            .timeout(Duration::from_secs(10))
            .query(&[("token_id", token_id)])
            .send()
            .await
            .context("clob book request failed")?
            .error_for_status()
            .context("clob book status")?
            .json()
            .await
            .context("clob book json parse")?;
        Ok(book)
    }
}

#[async_trait]
impl ProviderScraper for PolymarketScraper {
    fn name(&self) -> Provider {
        Provider::Polymarket
    }

    async fn fetch_snapshots(&self, ts_minute: i64) -> Result<Vec<OutcomeSnapshot>> {
        let markets: Vec<GammaMarket> = self
            .client
            .get(format!("{}/markets", GAMMA_API_BASE))
            .timeout(Duration::from_secs(10))
            .query(&[
                ("active", "true"),
                ("closed", "false"),
                ("limit", &LISTING_LIMIT.to_string()),
            ])
            .send()
            .await
            .context("gamma markets request failed")?
            .error_for_status()
            .context("gamma markets status")?
            .json()
            .await
            .context("gamma markets json parse")?;

        // Per-token order books, bounded fan-out.
        let token_ids: Vec<String> = markets
            .iter()
            .flat_map(|m| m.clob_token_ids.iter().cloned())
            .collect();

        let books: HashMap<String, BookSummary> = stream::iter(token_ids)
            .map(|token_id| async move {
                match self.fetch_book(&token_id).await {
                    Ok(book) => Some((token_id, summarize_book(&book))),
                    Err(e) => {
                        debug!(token_id = %token_id, error = %e, "book fetch failed");
                        None
                    }
                }
            })
            .buffer_unordered(BOOK_CONCURRENCY)
            .filter_map(|r| async move { r })
            .collect()
            .await;

        let mut snapshots = Vec::new();
        for market in &markets {
            let mut snaps = market_snapshots(market, &books, ts_minute);
            if snaps.is_empty() {
                warn!(slug = %market.slug, "gamma market yielded no usable outcomes");
            }
            snapshots.append(&mut snaps);
        }

        Ok(snapshots)
    }
}

fn market_snapshots(
    market: &GammaMarket,
    books: &HashMap<String, BookSummary>,
    ts_minute: i64,
) -> Vec<OutcomeSnapshot> {
    let title = market
        .question
        .clone()
        .unwrap_or_else(|| market.slug.clone());
    let status = if market.closed == Some(true) {
        "closed"
    } else {
        "open"
    };
    let normalized_category = market
        .category
        .as_deref()
        .map(NormalizedCategory::from_raw)
        .unwrap_or(NormalizedCategory::Other);
    let volume_24h_usd = market.volume24hr.unwrap_or(0.0);
    let market_liquidity = market.liquidity.unwrap_or(0.0);

    let metadata = json!({
        "slug": market.slug,
        "gamma_id": market.id,
    });

    let mut snapshots = Vec::with_capacity(market.outcomes.len());
    for (i, outcome_label) in market.outcomes.iter().enumerate() {
        let Some(token_id) = market.clob_token_ids.get(i) else {
            continue;
        };
        let book = books.get(token_id);

        let listed_price = market
            .outcome_prices
            .get(i)
            .and_then(|p| p.parse::<f64>().ok());

        let (probability, spread_pp, liquidity_usd) = match book {
            Some(summary) => {
                let prob = match (summary.best_bid, summary.best_ask) {
                    (Some(b), Some(a)) => Some((b + a) / 2.0),
                    _ => listed_price,
                };
                let Some(prob) = prob else { continue };
                let liquidity = if summary.depth_usd > 0.0 {
                    summary.depth_usd
                } else {
                    market_liquidity
                };
                (
                    normalize_probability(prob),
                    spread_pp_from_quotes(summary.best_bid, summary.best_ask),
                    liquidity,
                )
            }
            None => {
                let Some(prob) = listed_price else { continue };
                (normalize_probability(prob), None, market_liquidity)
            }
        };

        snapshots.push(OutcomeSnapshot {
            ts_minute,
            provider: Provider::Polymarket,
            market_id: market.slug.clone(),
            outcome_id: token_id.clone(),
            outcome_label: outcome_label.clone(),
            market_title: title.clone(),
            raw_category: market.category.clone(),
            normalized_category,
            status: status.to_string(),
            metadata: metadata.clone(),
            probability,
            spread_pp,
            volume_24h_usd,
            liquidity_usd,
        });
    }

    snapshots
}
