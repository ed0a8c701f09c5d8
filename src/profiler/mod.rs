//! Market anchor profiling: rules first, then the trained classifier,
//! then a fallback rule ladder.

pub mod anchor_model;
pub mod text;
pub mod train;

pub use anchor_model::{AnchorModel, AnchorModelHandle, ModelArtifact};

use crate::models::{AnchorType, MarketProfile};
use crate::store::{MarketForProfile, RadarStore};
use anyhow::Result;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use text::{
    has_crypto_news_pattern, has_digit, has_live_score_pattern, has_macro_pattern,
    has_policy_pattern, has_price_anchor, has_team_news_pattern, is_crypto_context,
    is_sports_context, normalize_text, tokenize,
};
use tracing::{info, warn};

/// Version stamped onto profiles produced without a loaded model.
pub const RULES_MODEL_VERSION: &str = "rules-v1";

/// Markets profiled per cycle.
const PROFILE_BATCH_SIZE: usize = 600;

/// Model predictions below this confidence fall through to the ladder.
const MODEL_MIN_CONFIDENCE: f64 = 0.55;

pub struct MarketProfiler {
    model: Arc<AnchorModelHandle>,
}

impl MarketProfiler {
    pub fn new(model: Arc<AnchorModelHandle>) -> Self {
        Self { model }
    }

    pub fn active_version(&self) -> String {
        self.model.active_version()
    }

    /// Profile any markets missing a row for the active model version.
    pub fn run(&self, store: &RadarStore) -> Result<usize> {
        let version = self.active_version();
        let markets = store.markets_needing_profile(&version, PROFILE_BATCH_SIZE)?;
        if markets.is_empty() {
            return Ok(0);
        }

        let now = Utc::now().timestamp();
        let mut profiled = 0usize;
        for market in &markets {
            let (anchor_type, confidence) = self.classify_anchor(market);
            let profile = MarketProfile {
                provider: market.provider,
                market_id: market.market_id.clone(),
                anchor_type,
                insider_possible: anchor_type.insider_possible(),
                confidence: Some(confidence),
                model_version: version.clone(),
                updated_at: now,
            };
            match store.upsert_profile(&profile) {
                Ok(()) => profiled += 1,
                Err(e) => warn!(
                    provider = market.provider.as_str(),
                    market_id = %market.market_id,
                    error = %e,
                    "profile upsert failed"
                ),
            }
        }

        info!(profiled, model_version = %version, "market profiles updated");
        Ok(profiled)
    }

    /// The hybrid cascade: high-precision hard rules, then the model with
    /// context sanity checks, then the pattern ladder.
    pub fn classify_anchor(&self, market: &MarketForProfile) -> (AnchorType, f64) {
        let text = market_document(market);
        let crypto_ctx = is_crypto_context(&market.normalized_category, &text);
        let sports_ctx = is_sports_context(&market.normalized_category, &text);

        if crypto_ctx && has_price_anchor(&text) && has_digit(&text) {
            return (AnchorType::SpotPriceAnchored, 0.95);
        }
        if sports_ctx && has_live_score_pattern(&text) && !has_team_news_pattern(&text) {
            return (AnchorType::LiveScoreAnchored, 0.95);
        }

        if let Some(model) = self.model.current() {
            if let Some((anchor, confidence)) = model.predict(&tokenize(&text)) {
                // Exogenous anchors need their context to actually match;
                // a spot/live-score prediction for an unrelated market is
                // discarded.
                let context_ok = match anchor {
                    AnchorType::SpotPriceAnchored => crypto_ctx && has_price_anchor(&text),
                    AnchorType::LiveScoreAnchored => sports_ctx,
                    _ => true,
                };
                if context_ok && confidence >= MODEL_MIN_CONFIDENCE {
                    return (anchor, confidence);
                }
            }
        }

        if has_macro_pattern(&text) {
            return (AnchorType::ScheduledMacroRelease, 0.8);
        }
        if crypto_ctx && has_crypto_news_pattern(&text) && !has_live_score_pattern(&text) {
            return (AnchorType::CryptoNewsSecurity, 0.8);
        }
        if sports_ctx && has_team_news_pattern(&text) {
            return (AnchorType::SportsTeamNews, 0.8);
        }
        if has_policy_pattern(&text) {
            return (AnchorType::PolicyRegulatoryDecision, 0.65);
        }

        (AnchorType::OtherUnknown, 0.3)
    }
}

/// Normalized document: display title plus the original title and combo
/// leg texts stashed in market metadata. The trainer uses the same
/// document so model features match prediction-time features.
pub fn market_document(market: &MarketForProfile) -> String {
    let metadata: Value = serde_json::from_str(&market.metadata_json).unwrap_or(Value::Null);

    let mut parts: Vec<&str> = vec![&market.title];
    if let Some(original) = metadata.get("original_title").and_then(Value::as_str) {
        parts.push(original);
    }
    let legs: Vec<String> = metadata
        .get("combo_legs")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    for leg in &legs {
        parts.push(leg);
    }

    normalize_text(&parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Provider;

    fn market(title: &str, category: &str) -> MarketForProfile {
        MarketForProfile {
            provider: Provider::Kalshi,
            market_id: "M1".to_string(),
            title: title.to_string(),
            raw_category: None,
            normalized_category: category.to_string(),
            metadata_json: "{}".to_string(),
        }
    }

    fn profiler() -> MarketProfiler {
        MarketProfiler::new(AnchorModelHandle::new("/nonexistent.json".to_string()))
    }

    #[test]
    fn crypto_price_anchor_hard_rule() {
        let (anchor, conf) =
            profiler().classify_anchor(&market("Will BTC close above $100,000?", "crypto"));
        assert_eq!(anchor, AnchorType::SpotPriceAnchored);
        assert_eq!(conf, 0.95);
    }

    #[test]
    fn live_score_hard_rule_requires_no_team_news() {
        let p = profiler();
        let (anchor, conf) =
            p.classify_anchor(&market("Will the Chiefs win by 7 or more?", "sports"));
        assert_eq!(anchor, AnchorType::LiveScoreAnchored);
        assert_eq!(conf, 0.95);

        // Same phrasing but with roster news lands in team news.
        let (anchor, _) = p.classify_anchor(&market(
            "Will the Chiefs win by 7 with their starting lineup ruled out?",
            "sports",
        ));
        assert_eq!(anchor, AnchorType::SportsTeamNews);
    }

    #[test]
    fn fallback_ladder_order() {
        let p = profiler();
        let (anchor, conf) = p.classify_anchor(&market("Will CPI inflation land above 3%?", "macro"));
        assert_eq!(anchor, AnchorType::ScheduledMacroRelease);
        assert_eq!(conf, 0.8);

        let (anchor, _) = p.classify_anchor(&market("Will the exchange hack be reimbursed?", "crypto"));
        assert_eq!(anchor, AnchorType::CryptoNewsSecurity);

        let (anchor, conf) = p.classify_anchor(&market("Will the senate bill pass?", "politics"));
        assert_eq!(anchor, AnchorType::PolicyRegulatoryDecision);
        assert_eq!(conf, 0.65);

        let (anchor, conf) = p.classify_anchor(&market("Will it rain tomorrow?", "other"));
        assert_eq!(anchor, AnchorType::OtherUnknown);
        assert_eq!(conf, 0.3);
    }

    #[test]
    fn model_prediction_used_when_confident() {
        let handle = AnchorModelHandle::new("/nonexistent.json".to_string());
        let model = AnchorModel::from_artifact(anchor_model::tiny_artifact()).unwrap();
        handle.install(model);
        let p = MarketProfiler::new(handle);

        let (anchor, conf) = p.classify_anchor(&market("Exchange exploit payroll hack", "other"));
        assert_eq!(anchor, AnchorType::CryptoNewsSecurity);
        assert!(conf >= 0.55);
    }

    #[test]
    fn combo_leg_text_feeds_the_cascade() {
        let mut m = market("yes Chiefs (+2 legs)", "other");
        m.metadata_json = serde_json::json!({
            "original_title": "yes Chiefs win by 10, yes BTC above $100k, no CPI above 3%",
            "combo_legs": ["yes Chiefs win by 10", "yes BTC above $100k", "no CPI above 3%"]
        })
        .to_string();

        // Crypto keyword + price anchor + digits from the legs.
        let (anchor, _) = profiler().classify_anchor(&m);
        assert_eq!(anchor, AnchorType::SpotPriceAnchored);
    }

    #[test]
    fn profiler_run_writes_profiles() {
        let store = RadarStore::open_in_memory().unwrap();
        let snap = crate::models::OutcomeSnapshot {
            ts_minute: 60,
            provider: Provider::Kalshi,
            market_id: "CPI-26".to_string(),
            outcome_id: "yes".to_string(),
            outcome_label: "Yes".to_string(),
            market_title: "Will CPI inflation land above 3%?".to_string(),
            raw_category: Some("Economics".to_string()),
            normalized_category: crate::models::NormalizedCategory::Macro,
            status: "open".to_string(),
            metadata: serde_json::json!({}),
            probability: 0.4,
            spread_pp: None,
            volume_24h_usd: 0.0,
            liquidity_usd: 0.0,
        };
        store.upsert_snapshots(&[snap]).unwrap();

        let p = profiler();
        assert_eq!(p.run(&store).unwrap(), 1);
        // Second run is a no-op at the same version.
        assert_eq!(p.run(&store).unwrap(), 0);

        let profile = store.get_profile(Provider::Kalshi, "CPI-26").unwrap().unwrap();
        assert_eq!(profile.anchor_type, AnchorType::ScheduledMacroRelease);
        assert!(profile.insider_possible);
        assert_eq!(profile.model_version, RULES_MODEL_VERSION);
    }
}
