//! Cycle scheduling: one pipeline pass per minute, no overlap.

use crate::alerts::Alerter;
use crate::classifier::classify_tick;
use crate::models::current_tick;
use crate::profiler::MarketProfiler;
use crate::scrapers::{fetch_all, ProviderScraper, SpotPriceFeed};
use crate::store::RadarStore;
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct CycleSummary {
    pub tick: i64,
    pub snapshots: usize,
    pub profiled: usize,
    pub deltas: usize,
    pub classified: usize,
    pub alerts: usize,
    pub elapsed_ms: u64,
}

pub struct Pipeline {
    store: RadarStore,
    scrapers: Vec<Arc<dyn ProviderScraper>>,
    profiler: MarketProfiler,
    spot_feed: Option<Arc<SpotPriceFeed>>,
    alerter: Alerter,
    interval_ms: u64,
    running: AtomicBool,
}

impl Pipeline {
    pub fn new(
        store: RadarStore,
        scrapers: Vec<Arc<dyn ProviderScraper>>,
        profiler: MarketProfiler,
        spot_feed: Option<Arc<SpotPriceFeed>>,
        alerter: Alerter,
        interval_ms: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            scrapers,
            profiler,
            spot_feed,
            alerter,
            interval_ms,
            running: AtomicBool::new(false),
        })
    }

    /// One full pass: ingest, profile, deltas, spot signals, classify,
    /// alert.
    pub async fn run_cycle(&self) -> Result<CycleSummary> {
        let started = Instant::now();
        let tick = current_tick();

        let batch = fetch_all(&self.scrapers, tick).await;
        let snapshots = self.store.upsert_snapshots(&batch)?;

        let profiled = self.profiler.run(&self.store)?;
        let deltas = self.store.compute_deltas()?;

        let spot = match &self.spot_feed {
            Some(feed) => feed.refresh().await,
            None => Default::default(),
        };

        let classified = classify_tick(&self.store, &spot)?;
        let alerts = self.alerter.run().await?;

        Ok(CycleSummary {
            tick,
            snapshots,
            profiled,
            deltas,
            classified,
            alerts,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Non-blocking try-lock around the cycle body: None when a cycle is
    /// already in flight.
    pub async fn try_run_cycle(&self) -> Option<Result<CycleSummary>> {
        if self.running.swap(true, Ordering::SeqCst) {
            return None;
        }
        let result = self.run_cycle().await;
        self.running.store(false, Ordering::SeqCst);
        Some(result)
    }

    async fn execute_tick(self: Arc<Self>) {
        match self.try_run_cycle().await {
            None => warn!("previous cycle still running, tick skipped"),
            Some(Ok(summary)) => info!(
                tick = summary.tick,
                snapshots = summary.snapshots,
                profiled = summary.profiled,
                deltas = summary.deltas,
                classified = summary.classified,
                alerts = summary.alerts,
                elapsed_ms = summary.elapsed_ms,
                "cycle complete"
            ),
            Some(Err(e)) => error!(error = %e, "cycle failed"),
        }
    }

    /// Run one immediate cycle, then tick on the fixed interval until the
    /// shutdown signal flips. The current cycle is drained before
    /// returning.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        self.clone().execute_tick().await;

        let mut ticker = interval(Duration::from_millis(self.interval_ms.max(1_000)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first interval tick fires immediately; the startup cycle
        // already covered it.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tokio::spawn(self.clone().execute_tick());
                }
                _ = shutdown.changed() => {
                    info!("shutdown signal received, draining current cycle");
                    break;
                }
            }
        }

        while self.running.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        self.store.checkpoint();
    }
}
