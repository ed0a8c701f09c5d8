//! Windowed delta computation at the current tick.

use super::RadarStore;
use crate::models::{round2, DeltaSet, Window};
use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension};
use tracing::debug;

impl RadarStore {
    /// Compute per-outcome probability deltas for every snapshot at the
    /// latest tick, one row per outcome. The reference for window `w` is
    /// the most recent snapshot of the same outcome at or before
    /// `t* - w`; absent references leave the column null.
    ///
    /// Returns the number of delta rows written.
    pub fn compute_deltas(&self) -> Result<usize> {
        let Some(tick) = self.latest_snapshot_tick()? else {
            return Ok(0);
        };

        self.with_conn(|conn| {
            let mut current_stmt = conn.prepare_cached(
                "SELECT provider, market_id, outcome_id, probability
                 FROM snapshots WHERE ts_minute = ?1",
            )?;
            let current: Vec<(String, String, String, f64)> = current_stmt
                .query_map(params![tick], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()
                .context("current tick snapshot scan failed")?;

            let mut ref_stmt = conn.prepare_cached(
                "SELECT probability FROM snapshots
                 WHERE provider = ?1 AND market_id = ?2 AND outcome_id = ?3
                   AND ts_minute <= ?4
                 ORDER BY ts_minute DESC
                 LIMIT 1",
            )?;
            let mut upsert_stmt = conn.prepare_cached(
                "INSERT INTO deltas
                     (ts_minute, provider, market_id, outcome_id,
                      delta_1m, delta_5m, delta_10m, delta_30m,
                      delta_1h, delta_6h, delta_12h, delta_24h)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT (ts_minute, provider, market_id, outcome_id) DO UPDATE SET
                     delta_1m = excluded.delta_1m,
                     delta_5m = excluded.delta_5m,
                     delta_10m = excluded.delta_10m,
                     delta_30m = excluded.delta_30m,
                     delta_1h = excluded.delta_1h,
                     delta_6h = excluded.delta_6h,
                     delta_12h = excluded.delta_12h,
                     delta_24h = excluded.delta_24h",
            )?;

            conn.execute_batch("BEGIN IMMEDIATE")?;
            let mut written = 0usize;
            let result = (|| -> Result<()> {
                for (provider, market_id, outcome_id, prob_now) in &current {
                    let mut values: [Option<f64>; Window::ALL.len()] =
                        [None; Window::ALL.len()];
                    for w in Window::ALL {
                        let cutoff = tick - w.minutes() * 60;
                        let prob_then: Option<f64> = ref_stmt
                            .query_row(
                                params![provider, market_id, outcome_id, cutoff],
                                |row| row.get(0),
                            )
                            .optional()?;
                        values[w.index()] =
                            prob_then.map(|p| round2((prob_now - p) * 100.0));
                    }

                    upsert_stmt.execute(params![
                        tick, provider, market_id, outcome_id, values[0], values[1],
                        values[2], values[3], values[4], values[5], values[6], values[7],
                    ])?;
                    written += 1;
                }
                Ok(())
            })();

            match result {
                Ok(()) => {
                    conn.execute_batch("COMMIT")?;
                    debug!(tick, rows = written, "deltas computed");
                    Ok(written)
                }
                Err(e) => {
                    let _ = conn.execute_batch("ROLLBACK");
                    Err(e).context("delta computation failed")
                }
            }
        })
    }

    /// Latest tick present in the deltas table.
    pub fn latest_delta_tick(&self) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            conn.query_row("SELECT MAX(ts_minute) FROM deltas", [], |row| {
                row.get::<_, Option<i64>>(0)
            })
            .context("latest delta tick query failed")
        })
    }

    /// Full delta set of one outcome at one tick.
    pub fn delta_set(
        &self,
        ts_minute: i64,
        provider: &str,
        market_id: &str,
        outcome_id: &str,
    ) -> Result<Option<DeltaSet>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT delta_1m, delta_5m, delta_10m, delta_30m,
                        delta_1h, delta_6h, delta_12h, delta_24h
                 FROM deltas
                 WHERE ts_minute = ?1 AND provider = ?2 AND market_id = ?3 AND outcome_id = ?4",
            )?;
            let row = stmt
                .query_row(params![ts_minute, provider, market_id, outcome_id], |row| {
                    let mut set = DeltaSet::default();
                    for (i, w) in Window::ALL.iter().enumerate() {
                        set.set(*w, row.get::<_, Option<f64>>(i)?);
                    }
                    Ok(set)
                })
                .optional()?;
            Ok(row)
        })
    }
}
