//! Opinion scraper (rate-limited REST provider).
//!
//! The listing is paginated until a short page; every request start is
//! paced through a process-scoped single-writer limiter that keeps us
//! strictly below the documented request rate. 429s back off
//! exponentially with bounded retries before surfacing as transient.

use super::{field_f64, field_str, json_f64, spread_pp_from_quotes, ProviderScraper};
use crate::models::{normalize_probability, NormalizedCategory, OutcomeSnapshot, Provider};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const PAGE_SIZE: usize = 50;
const MAX_PAGES: usize = 40;
const MAX_RATE_LIMIT_RETRIES: usize = 3;
/// Documented ceiling is ~14 rps; a 75ms gap keeps us strictly under it.
const REQUEST_GAP: Duration = Duration::from_millis(75);
/// Depth levels per side summed into the liquidity estimate.
const DEPTH_LEVELS: usize = 20;

/// Single-writer pacing state: the next instant a request may start.
/// Advanced on every request start, never shared across adapters.
pub struct RequestPacer {
    next_allowed: Mutex<Instant>,
    min_gap: Duration,
}

impl RequestPacer {
    pub fn new(min_gap: Duration) -> Self {
        Self {
            next_allowed: Mutex::new(Instant::now()),
            min_gap,
        }
    }

    /// Reserve the next request slot, sleeping until it opens.
    pub async fn acquire(&self) {
        let wait = {
            let mut next = self.next_allowed.lock();
            let now = Instant::now();
            let start = (*next).max(now);
            *next = start + self.min_gap;
            start.saturating_duration_since(now)
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}

pub struct OpinionScraper {
    client: reqwest::Client,
    base_url: Option<String>,
    api_key: Option<String>,
    feature_enabled: bool,
    pacer: RequestPacer,
}

impl OpinionScraper {
    pub fn new(
        client: reqwest::Client,
        base_url: Option<String>,
        api_key: Option<String>,
        feature_enabled: bool,
    ) -> Self {
        Self {
            client,
            base_url,
            api_key,
            feature_enabled,
            pacer: RequestPacer::new(REQUEST_GAP),
        }
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let base = self.base_url.as_deref().context("opinion base url missing")?;
        let url = format!("{}{}", base.trim_end_matches('/'), path);

        let mut backoff = Duration::from_millis(500);
        for attempt in 0..=MAX_RATE_LIMIT_RETRIES {
            self.pacer.acquire().await;

            let mut req = self
                .client
                .get(&url)
                .timeout(Duration::from_secs(10))
                .query(query);
            if let Some(key) = &self.api_key {
                req = req.bearer_auth(key);
            }

            let resp = req.send().await.context("opinion request failed")?;
            if resp.status() == StatusCode::TOO_MANY_REQUESTS {
                if attempt == MAX_RATE_LIMIT_RETRIES {
                    bail!("opinion rate limited after {} retries", attempt);
                }
                let delay = resp
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(Duration::from_secs)
                    .unwrap_or(backoff);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "opinion 429, backing off");
                tokio::time::sleep(delay).await;
                backoff *= 2;
                continue;
            }

            return resp
                .error_for_status()
                .context("opinion response status")?
                .json()
                .await
                .context("opinion json parse");
        }
        unreachable!("retry loop always returns or bails")
    }

    async fn outcome_depth(&self, market_id: &str, outcome_id: &str) -> Result<DepthSummary> {
        let body = self
            .get_json(
                "/orderbook",
                &[
                    ("market_id", market_id.to_string()),
                    ("outcome_id", outcome_id.to_string()),
                ],
            )
            .await?;
        Ok(summarize_depth(&body))
    }
}

#[async_trait]
impl ProviderScraper for OpinionScraper {
    fn name(&self) -> Provider {
        Provider::Opinion
    }

    fn enabled(&self) -> bool {
        self.feature_enabled && self.base_url.is_some()
    }

    async fn fetch_snapshots(&self, ts_minute: i64) -> Result<Vec<OutcomeSnapshot>> {
        let mut snapshots = Vec::new();

        for page in 1..=MAX_PAGES {
            let body = self
                .get_json(
                    "/markets",
                    &[
                        ("status", "open".to_string()),
                        ("page", page.to_string()),
                        ("limit", PAGE_SIZE.to_string()),
                    ],
                )
                .await?;

            let markets = listing_markets(&body);
            let page_len = markets.len();

            for market in &markets {
                match self.market_snapshots(market, ts_minute).await {
                    Ok(mut snaps) => snapshots.append(&mut snaps),
                    Err(e) => {
                        warn!(error = %e, "opinion market skipped");
                    }
                }
            }

            if page_len < PAGE_SIZE {
                break;
            }
        }

        Ok(snapshots)
    }
}

impl OpinionScraper {
    async fn market_snapshots(
        &self,
        market: &Value,
        ts_minute: i64,
    ) -> Result<Vec<OutcomeSnapshot>> {
        let parsed = parse_listing_market(market).context("unusable opinion market row")?;

        if parsed.outcomes.len() > 2 {
            // Multi-outcome markets carry no usable quote in the listing;
            // pull per-outcome order depth.
            let mut snaps = Vec::with_capacity(parsed.outcomes.len());
            for outcome in &parsed.outcomes {
                let depth = match self.outcome_depth(&parsed.market_id, &outcome.outcome_id).await
                {
                    Ok(d) => d,
                    Err(e) => {
                        debug!(
                            market_id = %parsed.market_id,
                            outcome_id = %outcome.outcome_id,
                            error = %e,
                            "opinion depth fetch failed"
                        );
                        DepthSummary::default()
                    }
                };

                let probability = match (depth.best_bid, depth.best_ask) {
                    (Some(b), Some(a)) => (b + a) / 2.0,
                    _ => match outcome.listed_probability {
                        Some(p) => p,
                        None => continue,
                    },
                };

                snaps.push(parsed.snapshot(
                    ts_minute,
                    &outcome.outcome_id,
                    &outcome.label,
                    normalize_probability(probability),
                    spread_pp_from_quotes(depth.best_bid, depth.best_ask),
                    if depth.depth_usd > 0.0 {
                        depth.depth_usd
                    } else {
                        parsed.liquidity_usd
                    },
                ));
            }
            return Ok(snaps);
        }

        // Binary market: yes from the listing quote, no as the complement.
        let yes = parsed
            .outcomes
            .first()
            .context("opinion binary market without outcomes")?;
        let p_yes = match (yes.best_bid, yes.best_ask) {
            (Some(b), Some(a)) => (b + a) / 2.0,
            _ => yes
                .listed_probability
                .context("opinion binary market without price")?,
        };
        let p_yes = normalize_probability(p_yes);
        let spread = spread_pp_from_quotes(yes.best_bid, yes.best_ask);

        let no_id = parsed
            .outcomes
            .get(1)
            .map(|o| o.outcome_id.clone())
            .unwrap_or_else(|| "no".to_string());
        let no_label = parsed
            .outcomes
            .get(1)
            .map(|o| o.label.clone())
            .unwrap_or_else(|| "No".to_string());

        Ok(vec![
            parsed.snapshot(
                ts_minute,
                &yes.outcome_id,
                &yes.label,
                p_yes,
                spread,
                parsed.liquidity_usd,
            ),
            parsed.snapshot(
                ts_minute,
                &no_id,
                &no_label,
                1.0 - p_yes,
                spread,
                parsed.liquidity_usd,
            ),
        ])
    }
}

/// Listing payloads vary: {"data": {"list": [...]}}, {"data": [...]}, or a
/// bare array.
fn listing_markets(body: &Value) -> Vec<Value> {
    if let Some(arr) = body.as_array() {
        return arr.clone();
    }
    if let Some(data) = body.get("data") {
        if let Some(arr) = data.as_array() {
            return arr.clone();
        }
        if let Some(arr) = data.get("list").and_then(Value::as_array) {
            return arr.clone();
        }
    }
    Vec::new()
}

#[derive(Debug, Clone)]
struct ListedOutcome {
    outcome_id: String,
    label: String,
    listed_probability: Option<f64>,
    best_bid: Option<f64>,
    best_ask: Option<f64>,
}

#[derive(Debug, Clone)]
struct ListedMarket {
    market_id: String,
    title: String,
    raw_category: Option<String>,
    status: String,
    volume_24h_usd: f64,
    liquidity_usd: f64,
    outcomes: Vec<ListedOutcome>,
}

impl ListedMarket {
    fn snapshot(
        &self,
        ts_minute: i64,
        outcome_id: &str,
        outcome_label: &str,
        probability: f64,
        spread_pp: Option<f64>,
        liquidity_usd: f64,
    ) -> OutcomeSnapshot {
        OutcomeSnapshot {
            ts_minute,
            provider: Provider::Opinion,
            market_id: self.market_id.clone(),
            outcome_id: outcome_id.to_string(),
            outcome_label: outcome_label.to_string(),
            market_title: self.title.clone(),
            raw_category: self.raw_category.clone(),
            normalized_category: self
                .raw_category
                .as_deref()
                .map(NormalizedCategory::from_raw)
                .unwrap_or(NormalizedCategory::Other),
            status: self.status.clone(),
            metadata: json!({}),
            probability,
            spread_pp,
            volume_24h_usd: self.volume_24h_usd,
            liquidity_usd,
        }
    }
}

/// Quote fields arrive as fractions or percents; canonicalize and treat
/// the 0/100 boundaries as absent quotes.
fn quote_prob(raw: Option<f64>) -> Option<f64> {
    raw.map(normalize_probability)
        .filter(|p| *p > 0.0 && *p < 1.0)
}

fn parse_listing_market(market: &Value) -> Option<ListedMarket> {
    let market_id = field_str(market, "market_id")
        .map(str::to_string)
        .or_else(|| field_f64(market, "market_id").map(|n| n.to_string()))
        .or_else(|| field_str(market, "id").map(str::to_string))
        .or_else(|| field_f64(market, "id").map(|n| n.to_string()))?;
    let title = field_str(market, "title")
        .or_else(|| field_str(market, "market_title"))?
        .to_string();

    let outcomes_raw = market
        .get("outcomes")
        .or_else(|| market.get("child_markets"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let outcomes: Vec<ListedOutcome> = outcomes_raw
        .iter()
        .filter_map(|o| {
            let outcome_id = field_str(o, "outcome_id")
                .map(str::to_string)
                .or_else(|| field_f64(o, "outcome_id").map(|n| n.to_string()))
                .or_else(|| field_str(o, "id").map(str::to_string))
                .or_else(|| field_f64(o, "id").map(|n| n.to_string()))?;
            let label = field_str(o, "title")
                .or_else(|| field_str(o, "name"))
                .unwrap_or(&outcome_id)
                .to_string();
            Some(ListedOutcome {
                listed_probability: field_f64(o, "price")
                    .or_else(|| field_f64(o, "yes_price"))
                    .map(normalize_probability),
                best_bid: quote_prob(field_f64(o, "best_bid")),
                best_ask: quote_prob(field_f64(o, "best_ask")),
                outcome_id,
                label,
            })
        })
        .collect();

    if outcomes.is_empty() {
        return None;
    }

    Some(ListedMarket {
        market_id,
        title,
        raw_category: field_str(market, "category").map(str::to_string),
        status: field_str(market, "status").unwrap_or("open").to_string(),
        volume_24h_usd: field_f64(market, "volume_24h").unwrap_or(0.0),
        liquidity_usd: field_f64(market, "liquidity").unwrap_or(0.0),
        outcomes,
    })
}

#[derive(Debug, Clone, Copy, Default)]
struct DepthSummary {
    best_bid: Option<f64>,
    best_ask: Option<f64>,
    depth_usd: f64,
}

/// Order-depth payloads list levels either as {"price","size"} objects or
/// [price, size] pairs.
fn summarize_depth(body: &Value) -> DepthSummary {
    fn levels(v: Option<&Value>) -> Vec<(f64, f64)> {
        v.and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|level| {
                        if let Some(pair) = level.as_array() {
                            let price = pair.first().and_then(json_f64)?;
                            let size = pair.get(1).and_then(json_f64)?;
                            Some((price, size))
                        } else {
                            let price = field_f64(level, "price")?;
                            let size = field_f64(level, "size").or_else(|| {
                                field_f64(level, "quantity")
                            })?;
                            Some((price, size))
                        }
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    let root = body.get("data").unwrap_or(body);
    let mut bids = levels(root.get("bids"));
    let mut asks = levels(root.get("asks"));
    bids.sort_by(|a, b| b.0.total_cmp(&a.0));
    asks.sort_by(|a, b| a.0.total_cmp(&b.0));

    let depth_usd = bids
        .iter()
        .take(DEPTH_LEVELS)
        .chain(asks.iter().take(DEPTH_LEVELS))
        .map(|(p, s)| normalize_probability(*p) * s)
        .sum();

    DepthSummary {
        best_bid: quote_prob(bids.first().map(|(p, _)| *p)),
        best_ask: quote_prob(asks.first().map(|(p, _)| *p)),
        depth_usd,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pacer_spaces_request_starts() {
        let pacer = RequestPacer::new(Duration::from_millis(75));
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();

        runtime.block_on(async {
            let start = Instant::now();
            for _ in 0..4 {
                pacer.acquire().await;
            }
            // Four slots: 0, 75, 150, 225ms.
            assert!(start.elapsed() >= Duration::from_millis(225));
        });
    }

    #[test]
    fn listing_shapes_are_all_accepted() {
        let bare = json!([{"id": 1}]);
        let wrapped = json!({"data": [{"id": 1}]});
        let nested = json!({"data": {"list": [{"id": 1}], "total": 1}});
        assert_eq!(listing_markets(&bare).len(), 1);
        assert_eq!(listing_markets(&wrapped).len(), 1);
        assert_eq!(listing_markets(&nested).len(), 1);
        assert!(listing_markets(&json!({"ok": true})).is_empty());
    }

    #[test]
    fn binary_market_parses_with_percent_quotes() {
        let market = json!({
            "market_id": 991,
            "title": "Will the bill pass this quarter?",
            "category": "Politics",
            "status": "open",
            "volume_24h": "90000",
            "liquidity": 15000,
            "outcomes": [
                {"outcome_id": "y", "title": "Yes", "price": 64, "best_bid": 62, "best_ask": 66},
                {"outcome_id": "n", "title": "No"}
            ]
        });

        let parsed = parse_listing_market(&market).unwrap();
        assert_eq!(parsed.market_id, "991");
        assert_eq!(parsed.volume_24h_usd, 90000.0);
        let yes = &parsed.outcomes[0];
        assert_eq!(yes.listed_probability, Some(0.64));
        assert_eq!(yes.best_bid, Some(0.62));
        assert_eq!(yes.best_ask, Some(0.66));
    }

    #[test]
    fn boundary_quotes_are_dropped() {
        assert_eq!(quote_prob(Some(0.0)), None);
        assert_eq!(quote_prob(Some(100.0)), None);
        assert_eq!(quote_prob(Some(55.0)), Some(0.55));
        assert_eq!(quote_prob(None), None);
    }

    #[test]
    fn depth_accepts_pairs_and_objects() {
        let pairs = json!({"bids": [[0.30, 100], [0.32, 50]], "asks": [[0.36, 40]]});
        let summary = summarize_depth(&pairs);
        assert_eq!(summary.best_bid, Some(0.32));
        assert_eq!(summary.best_ask, Some(0.36));
        assert!(summary.depth_usd > 0.0);

        let objects = json!({"data": {
            "bids": [{"price": "0.30", "size": "100"}],
            "asks": [{"price": "0.36", "quantity": "40"}]
        }});
        let summary = summarize_depth(&objects);
        assert_eq!(summary.best_bid, Some(0.30));
        assert_eq!(summary.best_ask, Some(0.36));
    }
}
