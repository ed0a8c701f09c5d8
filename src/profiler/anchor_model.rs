//! Anchor classifier artifact: a multinomial model with additive
//! smoothing, persisted as a versioned JSON blob and hot-reloaded without
//! restart.

use crate::models::AnchorType;
use anyhow::{Context, Result};
use arc_swap::ArcSwapOption;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// How often the artifact file is re-read for changes.
pub const MODEL_RELOAD_INTERVAL: Duration = Duration::from_secs(180);

/// Serialized model artifact (the trainer writes this, the worker reads it).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelArtifact {
    pub model_version: String,
    pub created_at: String,
    pub anchor_types: Vec<String>,
    pub vocab: Vec<String>,
    pub alpha: f64,
    pub log_prior: Vec<f64>,
    pub log_prob: Vec<Vec<f64>>,
}

/// In-memory model with the vocab index prebuilt.
#[derive(Debug)]
pub struct AnchorModel {
    pub artifact: ModelArtifact,
    classes: Vec<AnchorType>,
    vocab_index: HashMap<String, usize>,
}

impl AnchorModel {
    pub fn from_artifact(artifact: ModelArtifact) -> Result<Self> {
        let classes: Vec<AnchorType> = artifact
            .anchor_types
            .iter()
            .map(|s| AnchorType::parse(s).with_context(|| format!("unknown anchor type {}", s)))
            .collect::<Result<_>>()?;

        anyhow::ensure!(
            classes.len() == artifact.log_prior.len()
                && classes.len() == artifact.log_prob.len(),
            "model class dimensions disagree"
        );
        for row in &artifact.log_prob {
            anyhow::ensure!(
                row.len() == artifact.vocab.len(),
                "model vocab dimensions disagree"
            );
        }

        let vocab_index = artifact
            .vocab
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i))
            .collect();

        Ok(Self {
            artifact,
            classes,
            vocab_index,
        })
    }

    pub fn version(&self) -> &str {
        &self.artifact.model_version
    }

    /// Argmax of prior + in-vocab likelihoods; confidence is the softmax
    /// mass of the winning logit.
    pub fn predict(&self, tokens: &[String]) -> Option<(AnchorType, f64)> {
        if self.classes.is_empty() {
            return None;
        }

        let mut scores = self.artifact.log_prior.clone();
        for token in tokens {
            if let Some(&idx) = self.vocab_index.get(token) {
                for (class_idx, score) in scores.iter_mut().enumerate() {
                    *score += self.artifact.log_prob[class_idx][idx];
                }
            }
        }

        let (best_idx, best_score) = scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))?;

        let denom: f64 = scores.iter().map(|s| (s - best_score).exp()).sum();
        let confidence = 1.0 / denom;

        Some((self.classes[best_idx], confidence))
    }
}

/// Hot-swappable pointer to the active model. Readers snapshot lock-free;
/// the reloader swaps after a successful parse and keeps the previous
/// model when parsing fails.
pub struct AnchorModelHandle {
    current: ArcSwapOption<AnchorModel>,
    path: String,
}

impl AnchorModelHandle {
    pub fn new(path: String) -> Arc<Self> {
        Arc::new(Self {
            current: ArcSwapOption::empty(),
            path,
        })
    }

    pub fn current(&self) -> Option<Arc<AnchorModel>> {
        self.current.load_full()
    }

    /// Install a model directly (used by the trainer and tests).
    pub fn install(&self, model: AnchorModel) {
        self.current.store(Some(Arc::new(model)));
    }

    /// Version string stamped onto profiles; the rules-only version when
    /// no model is loaded.
    pub fn active_version(&self) -> String {
        self.current()
            .map(|m| m.version().to_string())
            .unwrap_or_else(|| super::RULES_MODEL_VERSION.to_string())
    }

    /// Read and swap in the artifact at `path`. Returns true when a new
    /// model was installed.
    pub fn reload(&self) -> bool {
        match self.try_load() {
            Ok(model) => {
                let changed = self
                    .current()
                    .map(|prev| prev.version() != model.version())
                    .unwrap_or(true);
                if changed {
                    info!(version = model.version(), "anchor model loaded");
                }
                self.current.store(Some(Arc::new(model)));
                changed
            }
            Err(e) => {
                // Previous model stays active.
                warn!(path = %self.path, error = %e, "anchor model reload failed");
                false
            }
        }
    }

    fn try_load(&self) -> Result<AnchorModel> {
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading model artifact {}", self.path))?;
        let artifact: ModelArtifact =
            serde_json::from_str(&raw).context("parsing model artifact json")?;
        AnchorModel::from_artifact(artifact)
    }

    /// Background task polling the artifact file.
    pub fn spawn_reloader(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(MODEL_RELOAD_INTERVAL);
            loop {
                ticker.tick().await;
                self.reload();
            }
        });
    }
}

/// Small two-class fixture shared by this module's tests and the
/// profiler's.
#[cfg(test)]
pub(crate) fn tiny_artifact() -> ModelArtifact {
    // "hack"/"exploit" mark crypto news, "cpi"/"payroll" macro releases.
    ModelArtifact {
        model_version: "nb-test-1".to_string(),
        created_at: "2026-01-01T00:00:00Z".to_string(),
        anchor_types: vec![
            "crypto_news_security".to_string(),
            "scheduled_macro_release".to_string(),
        ],
        vocab: vec![
            "cpi".to_string(),
            "exploit".to_string(),
            "hack".to_string(),
            "payroll".to_string(),
        ],
        alpha: 1.0,
        log_prior: vec![(0.5f64).ln(), (0.5f64).ln()],
        log_prob: vec![
            vec![(0.05f64).ln(), (0.45f64).ln(), (0.45f64).ln(), (0.05f64).ln()],
            vec![(0.45f64).ln(), (0.05f64).ln(), (0.05f64).ln(), (0.45f64).ln()],
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn predict_separates_classes() {
        let model = AnchorModel::from_artifact(tiny_artifact()).unwrap();

        let (anchor, conf) = model
            .predict(&["hack".to_string(), "exploit".to_string()])
            .unwrap();
        assert_eq!(anchor, AnchorType::CryptoNewsSecurity);
        assert!(conf > 0.9 && conf <= 1.0);

        let (anchor, _) = model.predict(&["cpi".to_string()]).unwrap();
        assert_eq!(anchor, AnchorType::ScheduledMacroRelease);
    }

    #[test]
    fn out_of_vocab_tokens_fall_back_to_priors() {
        let model = AnchorModel::from_artifact(tiny_artifact()).unwrap();
        let (_, conf) = model.predict(&["unrelated".to_string()]).unwrap();
        // Equal priors, no evidence: the softmax splits evenly.
        assert!((conf - 0.5).abs() < 1e-9);
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let mut artifact = tiny_artifact();
        artifact.log_prior.pop();
        assert!(AnchorModel::from_artifact(artifact).is_err());
    }

    #[test]
    fn artifact_serializes_camel_case() {
        let text = serde_json::to_string(&tiny_artifact()).unwrap();
        assert!(text.contains("\"modelVersion\""));
        assert!(text.contains("\"anchorTypes\""));
        assert!(text.contains("\"logPrior\""));
        assert!(text.contains("\"logProb\""));
    }

    #[test]
    fn reload_keeps_previous_model_on_bad_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("anchor_model.json");
        std::fs::write(
            &path,
            serde_json::to_string(&tiny_artifact()).unwrap(),
        )
        .unwrap();

        let handle = AnchorModelHandle::new(path.to_string_lossy().to_string());
        assert!(handle.current().is_none());
        assert!(handle.reload());
        assert_eq!(handle.active_version(), "nb-test-1");

        // Corrupt the file; the loaded model must survive.
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"{ not json").unwrap();
        drop(f);
        assert!(!handle.reload());
        assert_eq!(handle.active_version(), "nb-test-1");
    }

    #[test]
    fn missing_file_leaves_handle_empty() {
        let handle = AnchorModelHandle::new("/nonexistent/model.json".to_string());
        assert!(!handle.reload());
        assert!(handle.current().is_none());
    }
}
