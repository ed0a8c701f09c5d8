//! End-to-end pipeline tests over an in-memory store with a scripted
//! provider scraper and a recording chat dispatcher.

use anyhow::Result;
use async_trait::async_trait;
use axum::extract::{Query, State};
use parking_lot::Mutex;
use radarbot_backend::alerts::{Alerter, ChatDispatcher};
use radarbot_backend::api::movers::{get_movers, MoversQuery};
use radarbot_backend::api::ApiState;
use radarbot_backend::models::{
    current_tick, NormalizedCategory, OutcomeSnapshot, Provider,
};
use radarbot_backend::profiler::{AnchorModelHandle, MarketProfiler};
use radarbot_backend::scheduler::Pipeline;
use radarbot_backend::scrapers::ProviderScraper;
use radarbot_backend::store::RadarStore;
use serde_json::json;
use std::sync::Arc;

struct ScriptedScraper {
    snapshots: Mutex<Vec<OutcomeSnapshot>>,
}

impl ScriptedScraper {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            snapshots: Mutex::new(Vec::new()),
        })
    }

    fn set(&self, snaps: Vec<OutcomeSnapshot>) {
        *self.snapshots.lock() = snaps;
    }
}

#[async_trait]
impl ProviderScraper for ScriptedScraper {
    fn name(&self) -> Provider {
        Provider::Kalshi
    }

    async fn fetch_snapshots(&self, ts_minute: i64) -> Result<Vec<OutcomeSnapshot>> {
        let mut snaps = self.snapshots.lock().clone();
        for snap in &mut snaps {
            snap.ts_minute = ts_minute;
        }
        Ok(snaps)
    }
}

struct RecordingDispatcher {
    sent: Mutex<Vec<String>>,
}

impl RecordingDispatcher {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ChatDispatcher for RecordingDispatcher {
    async fn send_text(&self, body: &str) -> Result<()> {
        self.sent.lock().push(body.to_string());
        Ok(())
    }
}

fn politics_snapshot(outcome_id: &str, probability: f64) -> OutcomeSnapshot {
    OutcomeSnapshot {
        ts_minute: 0,
        provider: Provider::Kalshi,
        market_id: "CONFIRM-26".to_string(),
        outcome_id: outcome_id.to_string(),
        outcome_label: outcome_id.to_string(),
        market_title: "Will the senate confirm the nominee?".to_string(),
        raw_category: Some("Politics".to_string()),
        normalized_category: NormalizedCategory::Politics,
        status: "open".to_string(),
        metadata: json!({}),
        probability,
        spread_pp: Some(4.0),
        volume_24h_usd: 60_000.0,
        liquidity_usd: 25_000.0,
    }
}

struct Harness {
    store: RadarStore,
    scraper: Arc<ScriptedScraper>,
    dispatcher: Arc<RecordingDispatcher>,
    pipeline: Arc<Pipeline>,
}

fn harness() -> Harness {
    let store = RadarStore::open_in_memory().unwrap();
    let scraper = ScriptedScraper::new();
    let dispatcher = RecordingDispatcher::new();

    let profiler = MarketProfiler::new(AnchorModelHandle::new("/nonexistent.json".into()));
    let alerter = Alerter::new(
        store.clone(),
        Some(dispatcher.clone() as Arc<dyn ChatDispatcher>),
        5_000.0,
        15.0,
        30,
    );
    let pipeline = Pipeline::new(
        store.clone(),
        vec![scraper.clone() as Arc<dyn ProviderScraper>],
        profiler,
        None,
        alerter,
        60_000,
    );

    Harness {
        store,
        scraper,
        dispatcher,
        pipeline,
    }
}

#[tokio::test]
async fn full_cycle_writes_every_stage() {
    let h = harness();
    h.scraper.set(vec![
        politics_snapshot("yes", 0.60),
        politics_snapshot("no", 0.40),
    ]);

    let summary = h.pipeline.run_cycle().await.unwrap();
    assert_eq!(summary.snapshots, 2);
    assert_eq!(summary.profiled, 1);
    assert_eq!(summary.deltas, 2);
    assert_eq!(summary.classified, 2);
    // First tick has no lookback reference, so no window triggers.
    assert_eq!(summary.alerts, 0);

    // Every classification sits on a delta and a snapshot.
    assert_eq!(h.store.orphan_classification_count().unwrap(), 0);

    let profile = h
        .store
        .get_profile(Provider::Kalshi, "CONFIRM-26")
        .unwrap()
        .unwrap();
    assert!(profile.insider_possible);
}

#[tokio::test]
async fn rerunning_the_same_tick_is_idempotent() {
    let h = harness();
    h.scraper.set(vec![
        politics_snapshot("yes", 0.60),
        politics_snapshot("no", 0.40),
    ]);

    let first = h.pipeline.run_cycle().await.unwrap();
    let second = h.pipeline.run_cycle().await.unwrap();
    assert_eq!(first.snapshots, second.snapshots);
    assert_eq!(first.deltas, second.deltas);
    assert_eq!(first.classified, second.classified);

    assert_eq!(h.store.count_rows("snapshots").unwrap(), 2);
    assert_eq!(h.store.count_rows("deltas").unwrap(), 2);
    assert_eq!(h.store.count_rows("classifications").unwrap(), 2);
}

#[tokio::test]
async fn a_sharp_move_alerts_once_within_cooldown() {
    let h = harness();

    // Seed the previous minute directly so the cycle's tick sees a 1m
    // lookback reference.
    let mut prior = politics_snapshot("yes", 0.50);
    prior.ts_minute = current_tick() - 60;
    h.store.upsert_snapshots(&[prior]).unwrap();

    h.scraper.set(vec![politics_snapshot("yes", 0.59)]);

    let summary = h.pipeline.run_cycle().await.unwrap();
    assert_eq!(summary.alerts, 1);
    let sent = h.dispatcher.sent.lock().clone();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("Will the senate confirm the nominee?"));
    assert!(sent[0].contains("+9.00pp over 1m"));

    // The same qualifying move one cycle later stays silent (cooldown).
    let summary = h.pipeline.run_cycle().await.unwrap();
    assert_eq!(summary.alerts, 0);
    assert_eq!(h.dispatcher.sent.lock().len(), 1);
}

#[tokio::test]
async fn movers_endpoint_returns_grouped_markets() {
    let h = harness();
    h.scraper.set(vec![
        politics_snapshot("yes", 0.60),
        politics_snapshot("no", 0.40),
    ]);
    h.pipeline.run_cycle().await.unwrap();

    let state = ApiState {
        store: h.store.clone(),
    };
    let raw = MoversQuery {
        providers: Some("kalshi".to_string()),
        sort_window: Some("1m".to_string()),
        ..Default::default()
    };
    let response = get_movers(State(state), Query(raw)).await.unwrap();

    assert_eq!(response.0.data.len(), 1);
    let market = &response.0.data[0];
    assert_eq!(market.market_id, "CONFIRM-26");
    assert_eq!(market.outcomes.len(), 2);
    assert_eq!(market.normalized_category, "politics");
    assert_eq!(response.0.meta.total_rows, 1);
    assert_eq!(response.0.meta.total_pages, 1);

    // Every outcome row carries the full window map.
    assert_eq!(market.outcomes[0].deltas.len(), 8);
}
