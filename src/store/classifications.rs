//! Classification persistence and the classifier's input join.

use super::RadarStore;
use crate::models::{AnchorType, Classification, Provider};
use anyhow::{Context, Result};
use rusqlite::params;

/// One outcome at the latest delta tick, joined with its snapshot and the
/// market's profile (when present).
#[derive(Debug, Clone)]
pub struct ClassifierInput {
    pub ts_minute: i64,
    pub provider: Provider,
    pub market_id: String,
    pub outcome_id: String,
    pub market_title: String,
    pub raw_category: Option<String>,
    pub normalized_category: String,
    pub probability: f64,
    pub spread_pp: Option<f64>,
    pub volume_24h_usd: f64,
    pub delta_1m: Option<f64>,
    pub anchor_type: Option<AnchorType>,
    pub profile_confidence: Option<f64>,
    pub has_profile: bool,
}

impl RadarStore {
    /// Rows to classify at the latest delta tick.
    pub fn classifier_inputs(&self) -> Result<Vec<ClassifierInput>> {
        let Some(tick) = self.latest_delta_tick()? else {
            return Ok(Vec::new());
        };

        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT d.provider, d.market_id, d.outcome_id,
                        s.market_title, m.raw_category, s.normalized_category,
                        s.probability, s.spread_pp, s.volume_24h_usd,
                        d.delta_1m,
                        p.anchor_type, p.confidence,
                        p.market_id IS NOT NULL
                 FROM deltas d
                 JOIN snapshots s
                   ON s.ts_minute = d.ts_minute AND s.provider = d.provider
                  AND s.market_id = d.market_id AND s.outcome_id = d.outcome_id
                 JOIN markets m
                   ON m.provider = d.provider AND m.market_id = d.market_id
                 LEFT JOIN market_profiles p
                   ON p.provider = d.provider AND p.market_id = d.market_id
                 WHERE d.ts_minute = ?1",
            )?;
            let rows = stmt
                .query_map(params![tick], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, f64>(6)?,
                        row.get::<_, Option<f64>>(7)?,
                        row.get::<_, f64>(8)?,
                        row.get::<_, Option<f64>>(9)?,
                        row.get::<_, Option<String>>(10)?,
                        row.get::<_, Option<f64>>(11)?,
                        row.get::<_, bool>(12)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()
                .context("classifier input scan failed")?;

            Ok(rows
                .into_iter()
                .filter_map(
                    |(
                        provider,
                        market_id,
                        outcome_id,
                        market_title,
                        raw_category,
                        normalized_category,
                        probability,
                        spread_pp,
                        volume_24h_usd,
                        delta_1m,
                        anchor_type,
                        profile_confidence,
                        has_profile,
                    )| {
                        Some(ClassifierInput {
                            ts_minute: tick,
                            provider: Provider::parse(&provider)?,
                            market_id,
                            outcome_id,
                            market_title,
                            raw_category,
                            normalized_category,
                            probability,
                            spread_pp,
                            volume_24h_usd,
                            delta_1m,
                            anchor_type: anchor_type.as_deref().and_then(AnchorType::parse),
                            profile_confidence,
                            has_profile,
                        })
                    },
                )
                .collect())
        })
    }

    pub fn upsert_classification(&self, row: &Classification) -> Result<()> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "INSERT INTO classifications
                     (ts_minute, provider, market_id, outcome_id,
                      opaque_score, exogenous_score, label, reasons_json, model_version)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT (ts_minute, provider, market_id, outcome_id) DO UPDATE SET
                     opaque_score = excluded.opaque_score,
                     exogenous_score = excluded.exogenous_score,
                     label = excluded.label,
                     reasons_json = excluded.reasons_json,
                     model_version = excluded.model_version",
            )?;
            stmt.execute(params![
                row.ts_minute,
                row.provider.as_str(),
                row.market_id,
                row.outcome_id,
                row.opaque_score,
                row.exogenous_score,
                row.label.as_str(),
                serde_json::to_string(&row.reasons).unwrap_or_else(|_| "[]".to_string()),
                row.model_version,
            ])
            .context("classification upsert failed")?;
            Ok(())
        })
    }

    /// Latest tick present in the classifications table.
    pub fn latest_classification_tick(&self) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            conn.query_row("SELECT MAX(ts_minute) FROM classifications", [], |row| {
                row.get::<_, Option<i64>>(0)
            })
            .context("latest classification tick query failed")
        })
    }

    /// Windows make it into alerts only via delta columns; expose a sanity
    /// count for cycle summaries and tests.
    pub fn classification_count_at(&self, ts_minute: i64) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM classifications WHERE ts_minute = ?1",
                params![ts_minute],
                |row| row.get(0),
            )?)
        })
    }

    /// Every classification row must sit on a delta row and a snapshot row
    /// with identical identity (integrity check used by tests).
    pub fn orphan_classification_count(&self) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM classifications c
                 WHERE NOT EXISTS (
                     SELECT 1 FROM deltas d
                     WHERE d.ts_minute = c.ts_minute AND d.provider = c.provider
                       AND d.market_id = c.market_id AND d.outcome_id = c.outcome_id)
                    OR NOT EXISTS (
                     SELECT 1 FROM snapshots s
                     WHERE s.ts_minute = c.ts_minute AND s.provider = c.provider
                       AND s.market_id = c.market_id AND s.outcome_id = c.outcome_id)",
                [],
                |row| row.get(0),
            )?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClassificationLabel, NormalizedCategory, OutcomeSnapshot};
    use serde_json::json;

    fn snap(ts_minute: i64, probability: f64) -> OutcomeSnapshot {
        OutcomeSnapshot {
            ts_minute,
            provider: Provider::Polymarket,
            market_id: "M1".to_string(),
            outcome_id: "O1".to_string(),
            outcome_label: "Yes".to_string(),
            market_title: "Will BTC be above $100k?".to_string(),
            raw_category: Some("Crypto".to_string()),
            normalized_category: NormalizedCategory::Crypto,
            status: "open".to_string(),
            metadata: json!({}),
            probability,
            spread_pp: Some(3.0),
            volume_24h_usd: 12_000.0,
            liquidity_usd: 8_000.0,
        }
    }

    #[test]
    fn inputs_join_snapshot_and_profile() {
        let store = RadarStore::open_in_memory().unwrap();
        store.upsert_snapshots(&[snap(60, 0.5)]).unwrap();
        store.upsert_snapshots(&[snap(120, 0.58)]).unwrap();
        store.compute_deltas().unwrap();

        let inputs = store.classifier_inputs().unwrap();
        assert_eq!(inputs.len(), 1);
        let input = &inputs[0];
        assert_eq!(input.ts_minute, 120);
        assert!(!input.has_profile);
        assert_eq!(input.delta_1m, Some(8.0));
        assert_eq!(input.volume_24h_usd, 12_000.0);
    }

    #[test]
    fn classification_upsert_and_integrity() {
        let store = RadarStore::open_in_memory().unwrap();
        store.upsert_snapshots(&[snap(60, 0.5)]).unwrap();
        store.compute_deltas().unwrap();

        let row = Classification {
            ts_minute: 60,
            provider: Provider::Polymarket,
            market_id: "M1".to_string(),
            outcome_id: "O1".to_string(),
            opaque_score: 70.0,
            exogenous_score: 10.0,
            label: ClassificationLabel::OpaqueInfoSensitive,
            reasons: vec!["tight_spread".to_string()],
            model_version: "rules-v1".to_string(),
        };
        store.upsert_classification(&row).unwrap();
        store.upsert_classification(&row).unwrap();

        assert_eq!(store.classification_count_at(60).unwrap(), 1);
        assert_eq!(store.orphan_classification_count().unwrap(), 0);
        assert_eq!(store.latest_classification_tick().unwrap(), Some(60));
    }
}
