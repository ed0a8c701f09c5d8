//! Offline anchor-model trainer.
//!
//! Pulls rule-graded market profiles out of the database as weak labels,
//! fits the multinomial model on the deterministic 80% split, reports
//! held-out accuracy, and writes the versioned JSON artifact the worker
//! hot-reloads.

use anyhow::{ensure, Context, Result};
use chrono::Utc;
use clap::Parser;
use radarbot_backend::profiler::anchor_model::AnchorModel;
use radarbot_backend::profiler::market_document;
use radarbot_backend::profiler::text::tokenize;
use radarbot_backend::profiler::train::{evaluate, split_docs, train, TrainConfig, TrainDocument};
use radarbot_backend::store::RadarStore;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "train-anchor-model", about = "Train the market anchor classifier")]
struct Args {
    /// SQLite database holding markets and profiles.
    #[arg(long, env = "DATABASE_PATH", default_value = "radarbot.db")]
    database_path: String,

    /// Where the JSON artifact is written.
    #[arg(long, env = "ANCHOR_MODEL_PATH", default_value = "anchor_model.json")]
    output: String,

    /// Only profiles at or above this confidence become training labels.
    #[arg(long, default_value_t = 0.8)]
    min_label_confidence: f64,

    /// Minimum document frequency for vocabulary terms.
    #[arg(long, default_value_t = 3)]
    min_df: usize,

    /// Vocabulary size cap.
    #[arg(long, default_value_t = 3500)]
    max_vocab: usize,

    /// Additive smoothing.
    #[arg(long, default_value_t = 1.0)]
    alpha: f64,

    /// Artifact version; defaults to a timestamped id.
    #[arg(long)]
    model_version: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    let store = RadarStore::open(&args.database_path)
        .with_context(|| format!("opening database {}", args.database_path))?;

    let labeled = store.labeled_markets_for_training(args.min_label_confidence)?;
    ensure!(
        !labeled.is_empty(),
        "no labeled profiles at confidence >= {}; run the worker first",
        args.min_label_confidence
    );
    info!(rows = labeled.len(), "labeled markets loaded");

    let docs: Vec<TrainDocument> = labeled
        .into_iter()
        .map(|(market, label)| TrainDocument {
            key: format!("{}:{}", market.provider.as_str(), market.market_id),
            tokens: tokenize(&market_document(&market)),
            label,
        })
        .collect();

    let (train_docs, test_docs) = split_docs(docs);
    info!(
        train = train_docs.len(),
        test = test_docs.len(),
        "deterministic 80/20 split"
    );

    let now = Utc::now();
    let version = args
        .model_version
        .unwrap_or_else(|| format!("nb-{}", now.format("%Y%m%d%H%M")));

    let config = TrainConfig {
        min_df: args.min_df,
        max_vocab: args.max_vocab,
        alpha: args.alpha,
    };
    let artifact = train(&train_docs, &config, &version, &now.to_rfc3339())?;
    info!(
        version = %artifact.model_version,
        vocab = artifact.vocab.len(),
        classes = artifact.anchor_types.len(),
        "model trained"
    );

    let model = AnchorModel::from_artifact(artifact.clone())?;
    let train_acc = evaluate(&model, &train_docs);
    let test_acc = evaluate(&model, &test_docs);
    info!(
        train_accuracy = format!("{:.3}", train_acc).as_str(),
        test_accuracy = format!("{:.3}", test_acc).as_str(),
        "evaluation"
    );

    let json = serde_json::to_string_pretty(&artifact)?;
    std::fs::write(&args.output, json)
        .with_context(|| format!("writing artifact {}", args.output))?;
    info!(path = %args.output, "artifact written");

    Ok(())
}
