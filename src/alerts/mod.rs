//! Threshold alerting with per-signature cooldown.

pub mod telegram;

pub use telegram::TelegramDispatcher;

use crate::models::{format_tick, DeltaSet, Window};
use crate::store::{AlertCandidate, RadarStore};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

/// Upper bound on candidates considered per cycle.
const CANDIDATE_CAP: usize = 500;

/// Chat transport contract: deliver one plain-text message.
#[async_trait]
pub trait ChatDispatcher: Send + Sync {
    async fn send_text(&self, body: &str) -> Result<()>;
}

/// The window whose threshold a move clears hardest.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestWindow {
    pub window: Window,
    pub delta_pp: f64,
    pub score: f64,
}

/// Score every window with a non-null delta as |delta|/threshold and pick
/// the strongest among those at or above 1.0.
pub fn best_triggered_window(deltas: &DeltaSet) -> Option<BestWindow> {
    let mut best: Option<BestWindow> = None;
    for w in Window::ALL {
        let Some(delta) = deltas.get(w) else { continue };
        let score = delta.abs() / w.alert_threshold_pp();
        if score < 1.0 {
            continue;
        }
        if best.map(|b| score > b.score).unwrap_or(true) {
            best = Some(BestWindow {
                window: w,
                delta_pp: delta,
                score,
            });
        }
    }
    best
}

pub fn direction(delta_pp: f64) -> &'static str {
    if delta_pp >= 0.0 {
        "UP"
    } else {
        "DOWN"
    }
}

/// Dedup key: provider:market:outcome:window:direction.
pub fn alert_signature(candidate: &AlertCandidate, best: &BestWindow) -> String {
    format!(
        "{}:{}:{}:{}:{}",
        candidate.provider.as_str(),
        candidate.market_id,
        candidate.outcome_id,
        best.window.as_str(),
        direction(best.delta_pp)
    )
}

/// Plain-text multi-line alert body.
pub fn format_alert(candidate: &AlertCandidate, best: &BestWindow) -> String {
    format!(
        "🚨 Opaque move detected\n\
         Provider: {}\n\
         Market: {}\n\
         Outcome: {}\n\
         Probability: {:.1}%\n\
         Move: {:+.2}pp over {}\n\
         Label: {}\n\
         Reasons: {}\n\
         Tick: {}",
        candidate.provider.as_str(),
        candidate.market_title,
        candidate.outcome_label,
        candidate.probability * 100.0,
        best.delta_pp,
        best.window.as_str(),
        candidate.classification_label,
        candidate.reasons.join(", "),
        format_tick(candidate.ts_minute)
    )
}

pub struct Alerter {
    store: RadarStore,
    dispatcher: Option<Arc<dyn ChatDispatcher>>,
    min_liquidity_usd: f64,
    max_spread_pp: f64,
    cooldown_minutes: i64,
}

impl Alerter {
    pub fn new(
        store: RadarStore,
        dispatcher: Option<Arc<dyn ChatDispatcher>>,
        min_liquidity_usd: f64,
        max_spread_pp: f64,
        cooldown_minutes: i64,
    ) -> Self {
        Self {
            store,
            dispatcher,
            min_liquidity_usd,
            max_spread_pp,
            cooldown_minutes,
        }
    }

    pub async fn run(&self) -> Result<usize> {
        self.run_at(Utc::now().timestamp()).await
    }

    /// Alert pass with an injectable clock.
    pub async fn run_at(&self, now: i64) -> Result<usize> {
        let Some(dispatcher) = &self.dispatcher else {
            return Ok(0);
        };

        let candidates = self.store.alert_candidates(
            self.min_liquidity_usd,
            self.max_spread_pp,
            CANDIDATE_CAP,
        )?;

        let mut sent = 0usize;
        for candidate in &candidates {
            let Some(best) = best_triggered_window(&candidate.deltas) else {
                continue;
            };

            let signature = alert_signature(candidate, &best);
            if let Some(last_sent) = self.store.alert_last_sent(&signature)? {
                if now - last_sent < self.cooldown_minutes * 60 {
                    continue;
                }
            }

            match dispatcher.send_text(&format_alert(candidate, &best)).await {
                Ok(()) => {
                    // State is only recorded after a successful send, so a
                    // failed delivery retries next cycle.
                    self.store.record_alert_sent(&signature, now)?;
                    sent += 1;
                }
                Err(e) => {
                    warn!(signature = %signature, error = %e, "alert send failed");
                }
            }
        }

        if sent > 0 {
            info!(sent, "alerts dispatched");
        }
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Classification, ClassificationLabel, NormalizedCategory, OutcomeSnapshot, Provider,
    };
    use parking_lot::Mutex;

    struct RecordingDispatcher {
        sent: Mutex<Vec<String>>,
        fail: Mutex<bool>,
    }

    impl RecordingDispatcher {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                fail: Mutex::new(false),
            })
        }

        fn sent_count(&self) -> usize {
            self.sent.lock().len()
        }
    }

    #[async_trait]
    impl ChatDispatcher for RecordingDispatcher {
        async fn send_text(&self, body: &str) -> Result<()> {
            if *self.fail.lock() {
                anyhow::bail!("simulated transport failure");
            }
            self.sent.lock().push(body.to_string());
            Ok(())
        }
    }

    fn delta_set(values: &[(Window, f64)]) -> DeltaSet {
        let mut set = DeltaSet::default();
        for (w, v) in values {
            set.set(*w, Some(*v));
        }
        set
    }

    #[test]
    fn best_window_picks_highest_score() {
        // Scores: 7/6 = 1.17, 9/8 = 1.125, 20/14 = 1.43.
        let set = delta_set(&[
            (Window::M1, 7.0),
            (Window::M5, 9.0),
            (Window::M30, 20.0),
        ]);
        let best = best_triggered_window(&set).unwrap();
        assert_eq!(best.window, Window::M30);
        assert_eq!(best.delta_pp, 20.0);
        assert_eq!(direction(best.delta_pp), "UP");
    }

    #[test]
    fn no_window_triggers_below_threshold() {
        let set = delta_set(&[(Window::M1, 5.9), (Window::H24, -30.0)]);
        assert!(best_triggered_window(&set).is_none());

        let set = delta_set(&[(Window::H24, -38.0)]);
        let best = best_triggered_window(&set).unwrap();
        assert_eq!(best.window, Window::H24);
        assert_eq!(direction(best.delta_pp), "DOWN");
    }

    fn seed_candidate(store: &RadarStore) {
        // A prior snapshot so delta_1m exists and exceeds the 1m threshold.
        store.upsert_snapshots(&[snapshot(540, 0.50)]).unwrap();
        store.upsert_snapshots(&[snapshot(600, 0.59)]).unwrap();
        store.compute_deltas().unwrap();
        store
            .upsert_classification(&Classification {
                ts_minute: 600,
                provider: Provider::Kalshi,
                market_id: "M1".to_string(),
                outcome_id: "yes".to_string(),
                opaque_score: 70.0,
                exogenous_score: 10.0,
                label: ClassificationLabel::OpaqueInfoSensitive,
                reasons: vec!["meaningful_size_move".to_string()],
                model_version: "clf-rules-v1".to_string(),
            })
            .unwrap();
    }

    fn snapshot(ts_minute: i64, probability: f64) -> OutcomeSnapshot {
        OutcomeSnapshot {
            ts_minute,
            provider: Provider::Kalshi,
            market_id: "M1".to_string(),
            outcome_id: "yes".to_string(),
            outcome_label: "Yes".to_string(),
            market_title: "Cabinet pick announced?".to_string(),
            raw_category: Some("Politics".to_string()),
            normalized_category: NormalizedCategory::Politics,
            status: "open".to_string(),
            metadata: serde_json::json!({}),
            probability,
            spread_pp: Some(4.0),
            volume_24h_usd: 60_000.0,
            liquidity_usd: 25_000.0,
        }
    }

    #[tokio::test]
    async fn cooldown_suppresses_then_allows_resend() {
        let store = RadarStore::open_in_memory().unwrap();
        seed_candidate(&store);

        let dispatcher = RecordingDispatcher::new();
        let alerter = Alerter::new(store, Some(dispatcher.clone()), 5_000.0, 15.0, 30);

        let t0 = 1_000_000;
        assert_eq!(alerter.run_at(t0).await.unwrap(), 1);
        assert_eq!(dispatcher.sent_count(), 1);

        // 15 minutes later: same qualifying outcome, suppressed.
        assert_eq!(alerter.run_at(t0 + 15 * 60).await.unwrap(), 0);
        assert_eq!(dispatcher.sent_count(), 1);

        // 45 minutes later: past cooldown, resent.
        assert_eq!(alerter.run_at(t0 + 45 * 60).await.unwrap(), 1);
        assert_eq!(dispatcher.sent_count(), 2);
    }

    #[tokio::test]
    async fn failed_send_leaves_no_state_and_retries() {
        let store = RadarStore::open_in_memory().unwrap();
        seed_candidate(&store);

        let dispatcher = RecordingDispatcher::new();
        *dispatcher.fail.lock() = true;
        let alerter = Alerter::new(
            store.clone(),
            Some(dispatcher.clone()),
            5_000.0,
            15.0,
            30,
        );

        let t0 = 1_000_000;
        assert_eq!(alerter.run_at(t0).await.unwrap(), 0);
        assert_eq!(dispatcher.sent_count(), 0);

        // Transport recovers one minute later: the same signature goes out
        // immediately because no cooldown state was written.
        *dispatcher.fail.lock() = false;
        assert_eq!(alerter.run_at(t0 + 60).await.unwrap(), 1);
        assert_eq!(dispatcher.sent_count(), 1);
    }

    #[tokio::test]
    async fn disabled_dispatcher_sends_nothing() {
        let store = RadarStore::open_in_memory().unwrap();
        seed_candidate(&store);
        let alerter = Alerter::new(store, None, 5_000.0, 15.0, 30);
        assert_eq!(alerter.run_at(1_000_000).await.unwrap(), 0);
    }

    #[test]
    fn alert_message_includes_the_essentials() {
        let candidate = AlertCandidate {
            ts_minute: 600,
            provider: Provider::Kalshi,
            market_id: "M1".to_string(),
            outcome_id: "yes".to_string(),
            market_title: "Cabinet pick announced?".to_string(),
            outcome_label: "Yes".to_string(),
            probability: 0.59,
            liquidity_usd: 25_000.0,
            spread_pp: Some(4.0),
            deltas: delta_set(&[(Window::M1, 9.0)]),
            classification_label: "opaque_info_sensitive".to_string(),
            reasons: vec!["tight_spread".to_string()],
        };
        let best = best_triggered_window(&candidate.deltas).unwrap();
        let body = format_alert(&candidate, &best);

        assert!(body.contains("kalshi"));
        assert!(body.contains("Cabinet pick announced?"));
        assert!(body.contains("+9.00pp over 1m"));
        assert!(body.contains("opaque_info_sensitive"));
        assert!(body.contains("tight_spread"));

        let signature = alert_signature(&candidate, &best);
        assert_eq!(signature, "kalshi:M1:yes:1m:UP");
    }
}
