//! Alert candidate selection and cooldown state.

use super::RadarStore;
use crate::models::{DeltaSet, Provider, Window};
use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension};

/// An opaque-labeled outcome eligible for alerting at the latest
/// classification tick.
#[derive(Debug, Clone)]
pub struct AlertCandidate {
    pub ts_minute: i64,
    pub provider: Provider,
    pub market_id: String,
    pub outcome_id: String,
    pub market_title: String,
    pub outcome_label: String,
    pub probability: f64,
    pub liquidity_usd: f64,
    pub spread_pp: Option<f64>,
    pub deltas: DeltaSet,
    pub classification_label: String,
    pub reasons: Vec<String>,
}

impl RadarStore {
    /// Opaque-labeled movers at the latest classification tick passing the
    /// liquidity and spread gates, by |delta_1m| descending, capped.
    pub fn alert_candidates(
        &self,
        min_liquidity_usd: f64,
        max_spread_pp: f64,
        cap: usize,
    ) -> Result<Vec<AlertCandidate>> {
        let Some(tick) = self.latest_classification_tick()? else {
            return Ok(Vec::new());
        };

        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT c.provider, c.market_id, c.outcome_id,
                        s.market_title, o.label, s.probability,
                        s.liquidity_usd, s.spread_pp,
                        d.delta_1m, d.delta_5m, d.delta_10m, d.delta_30m,
                        d.delta_1h, d.delta_6h, d.delta_12h, d.delta_24h,
                        c.label, c.reasons_json
                 FROM classifications c
                 JOIN snapshots s
                   ON s.ts_minute = c.ts_minute AND s.provider = c.provider
                  AND s.market_id = c.market_id AND s.outcome_id = c.outcome_id
                 JOIN deltas d
                   ON d.ts_minute = c.ts_minute AND d.provider = c.provider
                  AND d.market_id = c.market_id AND d.outcome_id = c.outcome_id
                 JOIN outcomes o
                   ON o.provider = c.provider AND o.market_id = c.market_id
                  AND o.outcome_id = c.outcome_id
                 WHERE c.ts_minute = ?1
                   AND c.label = 'opaque_info_sensitive'
                   AND s.liquidity_usd >= ?2
                   AND s.spread_pp IS NOT NULL AND s.spread_pp <= ?3
                 ORDER BY ABS(COALESCE(d.delta_1m, 0)) DESC
                 LIMIT ?4",
            )?;

            let rows = stmt
                .query_map(
                    params![tick, min_liquidity_usd, max_spread_pp, cap as i64],
                    |row| {
                        let mut deltas = DeltaSet::default();
                        for (i, w) in Window::ALL.iter().enumerate() {
                            deltas.set(*w, row.get::<_, Option<f64>>(8 + i)?);
                        }
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, f64>(5)?,
                            row.get::<_, f64>(6)?,
                            row.get::<_, Option<f64>>(7)?,
                            deltas,
                            row.get::<_, String>(16)?,
                            row.get::<_, String>(17)?,
                        ))
                    },
                )?
                .collect::<std::result::Result<Vec<_>, _>>()
                .context("alert candidate scan failed")?;

            Ok(rows
                .into_iter()
                .filter_map(
                    |(
                        provider,
                        market_id,
                        outcome_id,
                        market_title,
                        outcome_label,
                        probability,
                        liquidity_usd,
                        spread_pp,
                        deltas,
                        classification_label,
                        reasons_json,
                    )| {
                        Some(AlertCandidate {
                            ts_minute: tick,
                            provider: Provider::parse(&provider)?,
                            market_id,
                            outcome_id,
                            market_title,
                            outcome_label,
                            probability,
                            liquidity_usd,
                            spread_pp,
                            deltas,
                            classification_label,
                            reasons: serde_json::from_str(&reasons_json).unwrap_or_default(),
                        })
                    },
                )
                .collect())
        })
    }

    pub fn alert_last_sent(&self, signature: &str) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare_cached("SELECT last_sent_at FROM alert_state WHERE signature = ?1")?;
            Ok(stmt
                .query_row(params![signature], |row| row.get(0))
                .optional()?)
        })
    }

    pub fn record_alert_sent(&self, signature: &str, sent_at: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO alert_state (signature, last_sent_at) VALUES (?1, ?2)
                 ON CONFLICT (signature) DO UPDATE SET last_sent_at = excluded.last_sent_at",
                params![signature, sent_at],
            )
            .context("alert state upsert failed")?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Classification, ClassificationLabel, NormalizedCategory, OutcomeSnapshot};
    use serde_json::json;

    fn snap(market_id: &str, liquidity: f64, spread: Option<f64>) -> OutcomeSnapshot {
        OutcomeSnapshot {
            ts_minute: 120,
            provider: Provider::Kalshi,
            market_id: market_id.to_string(),
            outcome_id: "yes".to_string(),
            outcome_label: "Yes".to_string(),
            market_title: format!("Market {}", market_id),
            raw_category: None,
            normalized_category: NormalizedCategory::Politics,
            status: "open".to_string(),
            metadata: json!({}),
            probability: 0.62,
            spread_pp: spread,
            volume_24h_usd: 50_000.0,
            liquidity_usd: liquidity,
        }
    }

    fn classify(store: &RadarStore, market_id: &str, label: ClassificationLabel) {
        store
            .upsert_classification(&Classification {
                ts_minute: 120,
                provider: Provider::Kalshi,
                market_id: market_id.to_string(),
                outcome_id: "yes".to_string(),
                opaque_score: 70.0,
                exogenous_score: 10.0,
                label,
                reasons: vec!["tight_spread".to_string()],
                model_version: "rules-v1".to_string(),
            })
            .unwrap();
    }

    #[test]
    fn candidates_filtered_by_label_liquidity_and_spread() {
        let store = RadarStore::open_in_memory().unwrap();
        store
            .upsert_snapshots(&[
                snap("pass", 20_000.0, Some(4.0)),
                snap("thin", 100.0, Some(4.0)),
                snap("wide", 20_000.0, Some(40.0)),
                snap("noquote", 20_000.0, None),
            ])
            .unwrap();
        store.compute_deltas().unwrap();

        classify(&store, "pass", ClassificationLabel::OpaqueInfoSensitive);
        classify(&store, "thin", ClassificationLabel::OpaqueInfoSensitive);
        classify(&store, "wide", ClassificationLabel::OpaqueInfoSensitive);
        classify(&store, "noquote", ClassificationLabel::OpaqueInfoSensitive);

        let candidates = store.alert_candidates(5_000.0, 15.0, 500).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].market_id, "pass");
        assert_eq!(candidates[0].reasons, vec!["tight_spread"]);
    }

    #[test]
    fn exogenous_rows_are_not_candidates() {
        let store = RadarStore::open_in_memory().unwrap();
        store
            .upsert_snapshots(&[snap("ex", 20_000.0, Some(4.0))])
            .unwrap();
        store.compute_deltas().unwrap();
        classify(&store, "ex", ClassificationLabel::ExogenousArbitrage);

        assert!(store.alert_candidates(5_000.0, 15.0, 500).unwrap().is_empty());
    }

    #[test]
    fn alert_state_roundtrip() {
        let store = RadarStore::open_in_memory().unwrap();
        assert_eq!(store.alert_last_sent("sig").unwrap(), None);
        store.record_alert_sent("sig", 1000).unwrap();
        assert_eq!(store.alert_last_sent("sig").unwrap(), Some(1000));
        store.record_alert_sent("sig", 2000).unwrap();
        assert_eq!(store.alert_last_sent("sig").unwrap(), Some(2000));
    }
}
