//! Market / outcome / snapshot upserts (the ingestion write path).

use super::RadarStore;
use crate::models::OutcomeSnapshot;
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::params;
use std::collections::BTreeMap;
use tracing::warn;

impl RadarStore {
    /// Upsert a cycle's snapshots. Rows are grouped per market and each
    /// market's outcome set is written in one transaction, so a market's
    /// contribution for a minute is all-or-nothing. A failed market is
    /// logged and skipped; the rest of the batch proceeds.
    ///
    /// Returns the number of snapshot rows written.
    pub fn upsert_snapshots(&self, snapshots: &[OutcomeSnapshot]) -> Result<usize> {
        if snapshots.is_empty() {
            return Ok(0);
        }

        let mut by_market: BTreeMap<(String, String), Vec<&OutcomeSnapshot>> = BTreeMap::new();
        for snap in snapshots {
            by_market
                .entry((snap.provider.as_str().to_string(), snap.market_id.clone()))
                .or_default()
                .push(snap);
        }

        let mut written = 0usize;
        self.with_conn(|conn| {
            for ((provider, market_id), rows) in &by_market {
                match Self::upsert_market_batch(conn, rows) {
                    Ok(n) => written += n,
                    Err(e) => {
                        warn!(
                            provider = %provider,
                            market_id = %market_id,
                            error = %e,
                            "market snapshot batch failed, will retry next tick"
                        );
                    }
                }
            }
            Ok(())
        })?;

        Ok(written)
    }

    fn upsert_market_batch(
        conn: &rusqlite::Connection,
        rows: &[&OutcomeSnapshot],
    ) -> Result<usize> {
        let first = rows.first().context("empty market batch")?;
        let now = Utc::now().timestamp();

        conn.execute_batch("BEGIN IMMEDIATE")?;
        let result = (|| -> Result<usize> {
            conn.execute(
                "INSERT INTO markets
                     (provider, market_id, title, raw_category, normalized_category,
                      status, metadata_json, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                 ON CONFLICT (provider, market_id) DO UPDATE SET
                     title = excluded.title,
                     raw_category = excluded.raw_category,
                     normalized_category = excluded.normalized_category,
                     status = excluded.status,
                     metadata_json = excluded.metadata_json,
                     updated_at = excluded.updated_at",
                params![
                    first.provider.as_str(),
                    first.market_id,
                    first.market_title,
                    first.raw_category,
                    first.normalized_category.as_str(),
                    first.status,
                    first.metadata.to_string(),
                    now,
                ],
            )
            .context("market upsert failed")?;

            let mut outcome_stmt = conn.prepare_cached(
                "INSERT INTO outcomes
                     (provider, market_id, outcome_id, label, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT (provider, market_id, outcome_id) DO UPDATE SET
                     label = excluded.label,
                     updated_at = excluded.updated_at",
            )?;
            let mut snap_stmt = conn.prepare_cached(
                "INSERT INTO snapshots
                     (ts_minute, provider, market_id, outcome_id, probability, spread_pp,
                      volume_24h_usd, liquidity_usd, market_title, normalized_category)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT (ts_minute, provider, market_id, outcome_id) DO UPDATE SET
                     probability = excluded.probability,
                     spread_pp = excluded.spread_pp,
                     volume_24h_usd = excluded.volume_24h_usd,
                     liquidity_usd = excluded.liquidity_usd,
                     market_title = excluded.market_title,
                     normalized_category = excluded.normalized_category",
            )?;

            let mut written = 0usize;
            for snap in rows {
                outcome_stmt.execute(params![
                    snap.provider.as_str(),
                    snap.market_id,
                    snap.outcome_id,
                    snap.outcome_label,
                    now,
                ])?;
                snap_stmt.execute(params![
                    snap.ts_minute,
                    snap.provider.as_str(),
                    snap.market_id,
                    snap.outcome_id,
                    snap.probability,
                    snap.spread_pp,
                    snap.volume_24h_usd,
                    snap.liquidity_usd,
                    snap.market_title,
                    snap.normalized_category.as_str(),
                ])?;
                written += 1;
            }
            Ok(written)
        })();

        match result {
            Ok(n) => {
                conn.execute_batch("COMMIT")?;
                Ok(n)
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Latest tick present in the snapshots table.
    pub fn latest_snapshot_tick(&self) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            conn.query_row("SELECT MAX(ts_minute) FROM snapshots", [], |row| {
                row.get::<_, Option<i64>>(0)
            })
            .context("latest snapshot tick query failed")
        })
    }

    /// Probability of one outcome at one tick (test/diagnostic helper).
    pub fn snapshot_probability(
        &self,
        ts_minute: i64,
        provider: &str,
        market_id: &str,
        outcome_id: &str,
    ) -> Result<Option<f64>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT probability FROM snapshots
                 WHERE ts_minute = ?1 AND provider = ?2 AND market_id = ?3 AND outcome_id = ?4",
            )?;
            let mut rows = stmt.query(params![ts_minute, provider, market_id, outcome_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row.get(0)?)),
                None => Ok(None),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NormalizedCategory, Provider};
    use serde_json::json;

    pub(crate) fn snap(
        ts_minute: i64,
        market_id: &str,
        outcome_id: &str,
        probability: f64,
    ) -> OutcomeSnapshot {
        OutcomeSnapshot {
            ts_minute,
            provider: Provider::Kalshi,
            market_id: market_id.to_string(),
            outcome_id: outcome_id.to_string(),
            outcome_label: outcome_id.to_string(),
            market_title: format!("Market {}", market_id),
            raw_category: Some("Politics".to_string()),
            normalized_category: NormalizedCategory::Politics,
            status: "open".to_string(),
            metadata: json!({}),
            probability,
            spread_pp: Some(2.0),
            volume_24h_usd: 50_000.0,
            liquidity_usd: 20_000.0,
        }
    }

    #[test]
    fn upsert_writes_market_outcome_snapshot() {
        let store = RadarStore::open_in_memory().unwrap();
        let n = store
            .upsert_snapshots(&[snap(600, "M1", "yes", 0.6), snap(600, "M1", "no", 0.4)])
            .unwrap();
        assert_eq!(n, 2);

        assert_eq!(store.latest_snapshot_tick().unwrap(), Some(600));
        assert_eq!(
            store.snapshot_probability(600, "kalshi", "M1", "yes").unwrap(),
            Some(0.6)
        );

        let market_count: i64 = store
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM markets", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(market_count, 1);
    }

    #[test]
    fn upsert_same_tick_is_idempotent() {
        let store = RadarStore::open_in_memory().unwrap();
        store
            .upsert_snapshots(&[snap(600, "M1", "yes", 0.6)])
            .unwrap();
        store
            .upsert_snapshots(&[snap(600, "M1", "yes", 0.65)])
            .unwrap();

        let count: i64 = store
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM snapshots", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(
            store.snapshot_probability(600, "kalshi", "M1", "yes").unwrap(),
            Some(0.65)
        );
    }

    #[test]
    fn market_metadata_and_title_refresh_on_update() {
        let store = RadarStore::open_in_memory().unwrap();
        let mut first = snap(600, "M1", "yes", 0.6);
        first.metadata = json!({"slug": "old"});
        store.upsert_snapshots(&[first]).unwrap();

        let mut second = snap(660, "M1", "yes", 0.7);
        second.market_title = "Renamed".to_string();
        second.metadata = json!({"slug": "new"});
        store.upsert_snapshots(&[second]).unwrap();

        let (title, meta): (String, String) = store
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT title, metadata_json FROM markets WHERE market_id = 'M1'",
                    [],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )?)
            })
            .unwrap();
        assert_eq!(title, "Renamed");
        assert!(meta.contains("new"));
    }
}
