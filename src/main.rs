//! Radarbot - prediction-market move radar
//!
//! Per-minute pipeline: snapshot ingestion across providers, market
//! profiling, windowed deltas, move classification, threshold alerting,
//! plus the read API for the dashboard.

use anyhow::{Context, Result};
use dotenv::dotenv;
use radarbot_backend::alerts::{Alerter, ChatDispatcher, TelegramDispatcher};
use radarbot_backend::api::{self, ApiState};
use radarbot_backend::config::Config;
use radarbot_backend::profiler::{AnchorModelHandle, MarketProfiler};
use radarbot_backend::scheduler::Pipeline;
use radarbot_backend::scrapers::{
    KalshiScraper, OpinionScraper, PolymarketScraper, ProviderScraper, SpotPriceFeed,
};
use radarbot_backend::store::RadarStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    info!("🛰️  Radarbot move radar starting");

    let config = Config::from_env();

    let http_client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .context("Failed to build HTTP client")?;

    // Migrations run inside open(); a failure here is fatal (exit 1).
    let store = RadarStore::open(&config.database_path)?;
    info!("📊 Database ready at: {}", config.database_path);

    let model_handle = AnchorModelHandle::new(config.anchor_model_path.clone());
    if model_handle.reload() {
        info!(version = %model_handle.active_version(), "anchor model active");
    } else {
        warn!(
            path = %config.anchor_model_path,
            "no anchor model artifact, profiling with rules only"
        );
    }
    model_handle.clone().spawn_reloader();

    let scrapers: Vec<Arc<dyn ProviderScraper>> = vec![
        Arc::new(KalshiScraper::new(http_client.clone())),
        Arc::new(PolymarketScraper::new(http_client.clone())),
        Arc::new(OpinionScraper::new(
            http_client.clone(),
            config.opinion_api_base.clone(),
            config.opinion_api_key.clone(),
            config.opinion_enabled,
        )),
    ];

    let spot_feed = Arc::new(SpotPriceFeed::new(http_client.clone()));

    let dispatcher: Option<Arc<dyn ChatDispatcher>> =
        TelegramDispatcher::from_config(http_client.clone(), &config)
            .map(|d| Arc::new(d) as Arc<dyn ChatDispatcher>);
    if dispatcher.is_none() {
        warn!("⚠️  Telegram not fully configured - alert delivery disabled");
    }

    let alerter = Alerter::new(
        store.clone(),
        dispatcher,
        config.min_liquidity_usd,
        config.max_spread_pp,
        config.alert_cooldown_minutes,
    );
    let profiler = MarketProfiler::new(model_handle.clone());

    let pipeline = Pipeline::new(
        store.clone(),
        scrapers,
        profiler,
        Some(spot_feed),
        alerter,
        config.worker_interval_ms,
    );

    // Read API serves independently of the pipeline cadence.
    let app = api::router(ApiState {
        store: store.clone(),
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind API listener on {}", addr))?;
    info!("📡 Read API listening on {}", addr);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server stopped");
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    pipeline.run(shutdown_rx).await;

    info!("👋 Shutdown complete");
    Ok(())
}

fn load_env() {
    let _ = dotenv();
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "radarbot_backend=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
