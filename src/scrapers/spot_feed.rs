//! Spot price signals for the classifier.
//!
//! Polls exchange spot tickers once per cycle and exposes the per-cycle
//! percent change for BTC and ETH. Purely in-memory; the first observation
//! of a symbol yields no signal.

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

const BINANCE_API_BASE: &str = "https://api.binance.com";

/// Percent changes since the previous refresh; None until two
/// observations exist (or when a fetch fails).
#[derive(Debug, Clone, Copy, Default)]
pub struct SpotSignals {
    pub btc_1m_pct: Option<f64>,
    pub eth_1m_pct: Option<f64>,
}

impl SpotSignals {
    /// Largest absolute move across tracked symbols.
    pub fn max_abs_pct(&self) -> Option<f64> {
        match (self.btc_1m_pct, self.eth_1m_pct) {
            (Some(b), Some(e)) => Some(b.abs().max(e.abs())),
            (Some(b), None) => Some(b.abs()),
            (None, Some(e)) => Some(e.abs()),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PricePoint {
    price: f64,
    #[allow(dead_code)]
    observed_at: i64,
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: String,
}

pub struct SpotPriceFeed {
    client: reqwest::Client,
    inner: RwLock<HashMap<String, PricePoint>>,
}

impl SpotPriceFeed {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch both symbols concurrently and return their percent changes.
    pub async fn refresh(&self) -> SpotSignals {
        let (btc, eth) = tokio::join!(
            self.refresh_symbol("BTCUSDT"),
            self.refresh_symbol("ETHUSDT")
        );
        SpotSignals {
            btc_1m_pct: btc,
            eth_1m_pct: eth,
        }
    }

    async fn refresh_symbol(&self, symbol: &str) -> Option<f64> {
        match self.fetch_price(symbol).await {
            Ok(price) => self.observe(symbol, price),
            Err(e) => {
                warn!(symbol, error = %e, "spot price fetch failed");
                None
            }
        }
    }

    /// Record an observation and return the change vs the previous one.
    fn observe(&self, symbol: &str, price: f64) -> Option<f64> {
        let mut map = self.inner.write();
        let previous = map.insert(
            symbol.to_string(),
            PricePoint {
                price,
                observed_at: Utc::now().timestamp(),
            },
        );
        previous.and_then(|prev| {
            if prev.price == 0.0 {
                None
            } else {
                Some((price - prev.price) / prev.price * 100.0)
            }
        })
    }

    async fn fetch_price(&self, symbol: &str) -> Result<f64> {
        let ticker: TickerPrice = self
            .client
            .get(format!("{}/api/v3/ticker/price", BINANCE_API_BASE))
            .timeout(Duration::from_secs(10))
            .query(&[("symbol", symbol)])
            .send()
            .await
            .context("ticker price request failed")?
            .error_for_status()
            .context("ticker price status")?
            .json()
            .await
            .context("ticker price json parse")?;

        ticker
            .price
            .parse::<f64>()
            .context("ticker price not numeric")
    }
}
