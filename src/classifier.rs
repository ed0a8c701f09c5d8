//! Rule-based outcome move classification.
//!
//! Additive scoring over two axes (opaque-information vs exogenous
//! arbitrage) from the outcome's deltas, its market profile, and external
//! spot-price signals.

use crate::models::{AnchorType, Classification, ClassificationLabel};
use crate::profiler::text::{is_crypto_context, is_sports_context, normalize_text};
use crate::scrapers::SpotSignals;
use crate::store::{ClassifierInput, RadarStore};
use anyhow::Result;
use tracing::{info, warn};

/// Stamped onto every classification row.
pub const CLASSIFIER_VERSION: &str = "clf-rules-v1";

/// Profiles without a stored confidence score count as this.
const DEFAULT_PROFILE_CONFIDENCE: f64 = 0.7;

/// The abrupt-move exogenous branch floors effective confidence here.
const ABRUPT_MOVE_MIN_CONFIDENCE: f64 = 0.9;

#[derive(Debug, Clone)]
pub struct ScoredOutcome {
    pub opaque_score: f64,
    pub exogenous_score: f64,
    pub label: ClassificationLabel,
    pub reasons: Vec<String>,
}

/// Apply the scoring rules to one outcome.
pub fn score_outcome(input: &ClassifierInput, spot: &SpotSignals) -> ScoredOutcome {
    let mut opaque = 20.0;
    let mut exogenous = 10.0;
    let mut reasons: Vec<String> = Vec::new();

    let conf = input
        .profile_confidence
        .unwrap_or(DEFAULT_PROFILE_CONFIDENCE)
        .clamp(0.0, 1.0);

    let mut tag = |reasons: &mut Vec<String>, name: &str| reasons.push(name.to_string());

    match input.anchor_type {
        Some(AnchorType::LiveScoreAnchored) => {
            exogenous += 60.0 * conf;
            tag(&mut reasons, "anchor_live_score");
        }
        Some(AnchorType::SpotPriceAnchored) => {
            exogenous += 55.0 * conf;
            tag(&mut reasons, "anchor_spot_price");
        }
        Some(AnchorType::SportsTeamNews) => {
            opaque += 45.0 * conf;
            tag(&mut reasons, "anchor_sports_team_news");
        }
        Some(AnchorType::CryptoNewsSecurity) => {
            opaque += 45.0 * conf;
            tag(&mut reasons, "anchor_crypto_news");
        }
        Some(AnchorType::ScheduledMacroRelease) => {
            opaque += 35.0 * conf;
            tag(&mut reasons, "anchor_macro_release");
        }
        Some(AnchorType::PolicyRegulatoryDecision) => {
            opaque += 30.0 * conf;
            tag(&mut reasons, "anchor_policy_decision");
        }
        Some(AnchorType::OtherUnknown) | None => {}
    }

    // Without a meaningful anchor, broad context still hints at fast
    // public references.
    let unanchored =
        !input.has_profile || input.anchor_type == Some(AnchorType::OtherUnknown);
    if unanchored {
        let text = normalize_text(&[&input.market_title]);
        if is_sports_context(&input.normalized_category, &text) {
            exogenous += 15.0;
            tag(&mut reasons, "sports_related");
        }
        if is_crypto_context(&input.normalized_category, &text) {
            exogenous += 10.0;
            tag(&mut reasons, "crypto_related");
        }
    }

    if input.anchor_type == Some(AnchorType::SpotPriceAnchored)
        && spot.max_abs_pct().map(|p| p >= 0.8).unwrap_or(false)
    {
        exogenous += 18.0;
        tag(&mut reasons, "spot_price_shock");
    }

    if matches!(
        input.normalized_category.as_str(),
        "politics" | "policy" | "macro" | "other"
    ) {
        opaque += 20.0;
        tag(&mut reasons, "opaque_info_prone_category");
    }

    let abs_delta_1m = input.delta_1m.map(f64::abs);

    if input.volume_24h_usd >= 10_000.0 && abs_delta_1m.map(|d| d >= 4.0).unwrap_or(false) {
        opaque += 20.0;
        tag(&mut reasons, "meaningful_size_move");
    }

    if input.spread_pp.map(|s| s <= 8.0).unwrap_or(false) {
        opaque += 10.0;
        tag(&mut reasons, "tight_spread");
    }

    if abs_delta_1m.map(|d| d >= 15.0).unwrap_or(false) {
        if matches!(
            input.anchor_type,
            Some(AnchorType::LiveScoreAnchored) | Some(AnchorType::SpotPriceAnchored)
        ) {
            exogenous += 12.0 * conf.max(ABRUPT_MOVE_MIN_CONFIDENCE);
        } else {
            opaque += 10.0;
        }
        tag(&mut reasons, "abrupt_micro_move");
    }

    let opaque_score = opaque.clamp(0.0, 100.0);
    let exogenous_score = exogenous.clamp(0.0, 100.0);

    let label = if opaque_score >= exogenous_score && opaque_score >= 50.0 {
        ClassificationLabel::OpaqueInfoSensitive
    } else if exogenous_score >= 50.0 {
        ClassificationLabel::ExogenousArbitrage
    } else {
        ClassificationLabel::Unclear
    };

    ScoredOutcome {
        opaque_score,
        exogenous_score,
        label,
        reasons,
    }
}

/// Classify every outcome at the latest delta tick and persist one row
/// each. Returns rows written.
pub fn classify_tick(store: &RadarStore, spot: &SpotSignals) -> Result<usize> {
    let inputs = store.classifier_inputs()?;
    if inputs.is_empty() {
        return Ok(0);
    }

    let mut written = 0usize;
    for input in &inputs {
        let scored = score_outcome(input, spot);
        let row = Classification {
            ts_minute: input.ts_minute,
            provider: input.provider,
            market_id: input.market_id.clone(),
            outcome_id: input.outcome_id.clone(),
            opaque_score: scored.opaque_score,
            exogenous_score: scored.exogenous_score,
            label: scored.label,
            reasons: scored.reasons,
            model_version: CLASSIFIER_VERSION.to_string(),
        };
        match store.upsert_classification(&row) {
            Ok(()) => written += 1,
            Err(e) => warn!(
                provider = input.provider.as_str(),
                market_id = %input.market_id,
                outcome_id = %input.outcome_id,
                error = %e,
                "classification upsert failed"
            ),
        }
    }

    info!(written, "outcomes classified");
    Ok(written)
}
