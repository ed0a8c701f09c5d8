//! Offline training for the anchor classifier.
//!
//! Deterministic end to end: a stable hash of `provider:market_id` picks
//! the train/test split, and vocabulary selection breaks frequency ties
//! lexicographically, so retraining on the same rows reproduces the same
//! artifact.

use super::anchor_model::{AnchorModel, ModelArtifact};
use crate::models::AnchorType;
use anyhow::{ensure, Result};
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct TrainConfig {
    /// Minimum document frequency for a token to enter the vocabulary.
    pub min_df: usize,
    /// Vocabulary cap; most frequent tokens win, ties lexicographic.
    pub max_vocab: usize,
    /// Additive smoothing.
    pub alpha: f64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            min_df: 3,
            max_vocab: 3500,
            alpha: 1.0,
        }
    }
}

/// One labeled document; `key` is `provider:market_id`.
#[derive(Debug, Clone)]
pub struct TrainDocument {
    pub key: String,
    pub tokens: Vec<String>,
    pub label: AnchorType,
}

/// FNV-1a, the stable hash behind the split.
pub fn fnv1a64(s: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in s.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Buckets 0-7 train, 8-9 test.
pub fn is_training_doc(key: &str) -> bool {
    fnv1a64(key) % 10 <= 7
}

pub fn split_docs(docs: Vec<TrainDocument>) -> (Vec<TrainDocument>, Vec<TrainDocument>) {
    docs.into_iter().partition(|d| is_training_doc(&d.key))
}

/// Fit the multinomial model on training documents.
pub fn train(
    docs: &[TrainDocument],
    config: &TrainConfig,
    model_version: &str,
    created_at: &str,
) -> Result<ModelArtifact> {
    ensure!(!docs.is_empty(), "no training documents");

    // Classes present in the data, in canonical order.
    let present: HashSet<AnchorType> = docs.iter().map(|d| d.label).collect();
    let classes: Vec<AnchorType> = AnchorType::ALL
        .iter()
        .copied()
        .filter(|a| present.contains(a))
        .collect();
    ensure!(classes.len() >= 2, "need at least two labeled classes");

    // Document frequency per token.
    let mut df: BTreeMap<&str, usize> = BTreeMap::new();
    for doc in docs {
        let unique: HashSet<&str> = doc.tokens.iter().map(String::as_str).collect();
        for token in unique {
            *df.entry(token).or_insert(0) += 1;
        }
    }

    // Frequency-descending, lexicographic tiebreak, bounded.
    let mut candidates: Vec<(&str, usize)> = df
        .into_iter()
        .filter(|(_, count)| *count >= config.min_df)
        .collect();
    candidates.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    candidates.truncate(config.max_vocab);

    let mut vocab: Vec<String> = candidates.into_iter().map(|(t, _)| t.to_string()).collect();
    vocab.sort();
    let vocab_index: HashMap<&str, usize> = vocab
        .iter()
        .enumerate()
        .map(|(i, t)| (t.as_str(), i))
        .collect();
    ensure!(!vocab.is_empty(), "vocabulary is empty; lower min_df");

    let class_index: HashMap<AnchorType, usize> =
        classes.iter().enumerate().map(|(i, c)| (*c, i)).collect();

    let mut class_docs = vec![0usize; classes.len()];
    let mut token_counts = vec![vec![0usize; vocab.len()]; classes.len()];
    let mut class_token_totals = vec![0usize; classes.len()];

    for doc in docs {
        let c = class_index[&doc.label];
        class_docs[c] += 1;
        for token in &doc.tokens {
            if let Some(&t) = vocab_index.get(token.as_str()) {
                token_counts[c][t] += 1;
                class_token_totals[c] += 1;
            }
        }
    }

    let total_docs = docs.len() as f64;
    let log_prior: Vec<f64> = class_docs
        .iter()
        .map(|&n| (n as f64 / total_docs).ln())
        .collect();

    let vocab_size = vocab.len() as f64;
    let log_prob: Vec<Vec<f64>> = token_counts
        .iter()
        .zip(&class_token_totals)
        .map(|(counts, &total)| {
            let denom = total as f64 + config.alpha * vocab_size;
            counts
                .iter()
                .map(|&count| ((count as f64 + config.alpha) / denom).ln())
                .collect()
        })
        .collect();

    Ok(ModelArtifact {
        model_version: model_version.to_string(),
        created_at: created_at.to_string(),
        anchor_types: classes.iter().map(|c| c.as_str().to_string()).collect(),
        vocab,
        alpha: config.alpha,
        log_prior,
        log_prob,
    })
}

/// Held-out accuracy.
pub fn evaluate(model: &AnchorModel, docs: &[TrainDocument]) -> f64 {
    if docs.is_empty() {
        return 0.0;
    }
    let correct = docs
        .iter()
        .filter(|doc| {
            model
                .predict(&doc.tokens)
                .map(|(anchor, _)| anchor == doc.label)
                .unwrap_or(false)
        })
        .count();
    correct as f64 / docs.len() as f64
}
