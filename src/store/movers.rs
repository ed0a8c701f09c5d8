//! Read-side queries backing the movers endpoint.

use super::RadarStore;
use crate::models::{DeltaSet, NormalizedCategory, Provider, Window};
use anyhow::{Context, Result};
use rusqlite::params_from_iter;
use rusqlite::types::Value as SqlValue;

/// Row-level filters applied before grouping into market rows.
#[derive(Debug, Clone)]
pub struct MoverFilters {
    pub providers: Vec<Provider>,
    pub category: Option<NormalizedCategory>,
    /// When set, only outcomes whose liquidity/spread pass the gates
    /// qualify (includeLowLiquidity=false).
    pub liquidity_gate: Option<(f64, f64)>,
}

/// One outcome at the latest delta tick with everything the dashboard row
/// needs.
#[derive(Debug, Clone)]
pub struct MoverOutcomeRow {
    pub ts_minute: i64,
    pub provider: Provider,
    pub market_id: String,
    pub market_title: String,
    pub normalized_category: String,
    pub market_metadata_json: String,
    pub outcome_id: String,
    pub outcome_label: String,
    pub probability: f64,
    pub spread_pp: Option<f64>,
    pub volume_24h_usd: f64,
    pub liquidity_usd: f64,
    pub deltas: DeltaSet,
    pub classification_label: Option<String>,
    pub reasons: Vec<String>,
}

impl RadarStore {
    /// All outcome rows at the latest delta tick passing the row-level
    /// filters. Grouping, lead selection, ordering and pagination happen in
    /// the API layer.
    pub fn mover_rows(&self, filters: &MoverFilters) -> Result<Vec<MoverOutcomeRow>> {
        let Some(tick) = self.latest_delta_tick()? else {
            return Ok(Vec::new());
        };
        if filters.providers.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = (2..2 + filters.providers.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");

        let mut sql = format!(
            "SELECT d.provider, d.market_id, s.market_title, s.normalized_category,
                    m.metadata_json, d.outcome_id, o.label,
                    s.probability, s.spread_pp, s.volume_24h_usd, s.liquidity_usd,
                    d.delta_1m, d.delta_5m, d.delta_10m, d.delta_30m,
                    d.delta_1h, d.delta_6h, d.delta_12h, d.delta_24h,
                    c.label, c.reasons_json
             FROM deltas d
             JOIN snapshots s
               ON s.ts_minute = d.ts_minute AND s.provider = d.provider
              AND s.market_id = d.market_id AND s.outcome_id = d.outcome_id
             JOIN markets m
               ON m.provider = d.provider AND m.market_id = d.market_id
             JOIN outcomes o
               ON o.provider = d.provider AND o.market_id = d.market_id
              AND o.outcome_id = d.outcome_id
             LEFT JOIN classifications c
               ON c.ts_minute = d.ts_minute AND c.provider = d.provider
              AND c.market_id = d.market_id AND c.outcome_id = d.outcome_id
             WHERE d.ts_minute = ?1 AND d.provider IN ({})",
            placeholders
        );

        let mut params: Vec<SqlValue> = vec![SqlValue::Integer(tick)];
        params.extend(
            filters
                .providers
                .iter()
                .map(|p| SqlValue::Text(p.as_str().to_string())),
        );

        if let Some(cat) = filters.category {
            params.push(SqlValue::Text(cat.as_str().to_string()));
            sql.push_str(&format!(" AND s.normalized_category = ?{}", params.len()));
        }
        if let Some((min_liquidity, max_spread)) = filters.liquidity_gate {
            params.push(SqlValue::Real(min_liquidity));
            sql.push_str(&format!(" AND s.liquidity_usd >= ?{}", params.len()));
            params.push(SqlValue::Real(max_spread));
            sql.push_str(&format!(
                " AND s.spread_pp IS NOT NULL AND s.spread_pp <= ?{}",
                params.len()
            ));
        }

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(params.iter()), |row| {
                    let mut deltas = DeltaSet::default();
                    for (i, w) in Window::ALL.iter().enumerate() {
                        deltas.set(*w, row.get::<_, Option<f64>>(11 + i)?);
                    }
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, f64>(7)?,
                        row.get::<_, Option<f64>>(8)?,
                        row.get::<_, f64>(9)?,
                        row.get::<_, f64>(10)?,
                        deltas,
                        row.get::<_, Option<String>>(19)?,
                        row.get::<_, Option<String>>(20)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()
                .context("mover row scan failed")?;

            Ok(rows
                .into_iter()
                .filter_map(
                    |(
                        provider,
                        market_id,
                        market_title,
                        normalized_category,
                        market_metadata_json,
                        outcome_id,
                        outcome_label,
                        probability,
                        spread_pp,
                        volume_24h_usd,
                        liquidity_usd,
                        deltas,
                        classification_label,
                        reasons_json,
                    )| {
                        Some(MoverOutcomeRow {
                            ts_minute: tick,
                            provider: Provider::parse(&provider)?,
                            market_id,
                            market_title,
                            normalized_category,
                            market_metadata_json,
                            outcome_id,
                            outcome_label,
                            probability,
                            spread_pp,
                            volume_24h_usd,
                            liquidity_usd,
                            deltas,
                            classification_label,
                            reasons: reasons_json
                                .as_deref()
                                .and_then(|r| serde_json::from_str(r).ok())
                                .unwrap_or_default(),
                        })
                    },
                )
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NormalizedCategory, OutcomeSnapshot};
    use serde_json::json;

    fn snap(provider: Provider, market_id: &str, cat: NormalizedCategory) -> OutcomeSnapshot {
        OutcomeSnapshot {
            ts_minute: 300,
            provider,
            market_id: market_id.to_string(),
            outcome_id: "yes".to_string(),
            outcome_label: "Yes".to_string(),
            market_title: format!("Market {}", market_id),
            raw_category: None,
            normalized_category: cat,
            status: "open".to_string(),
            metadata: json!({"slug": market_id}),
            probability: 0.5,
            spread_pp: Some(3.0),
            volume_24h_usd: 1_000.0,
            liquidity_usd: 10_000.0,
        }
    }

    #[test]
    fn provider_and_category_filters_apply() {
        let store = RadarStore::open_in_memory().unwrap();
        store
            .upsert_snapshots(&[
                snap(Provider::Kalshi, "K1", NormalizedCategory::Politics),
                snap(Provider::Polymarket, "P1", NormalizedCategory::Crypto),
                snap(Provider::Opinion, "O1", NormalizedCategory::Crypto),
            ])
            .unwrap();
        store.compute_deltas().unwrap();

        let rows = store
            .mover_rows(&MoverFilters {
                providers: vec![Provider::Kalshi, Provider::Polymarket],
                category: None,
                liquidity_gate: None,
            })
            .unwrap();
        assert_eq!(rows.len(), 2);

        let rows = store
            .mover_rows(&MoverFilters {
                providers: vec![Provider::Kalshi, Provider::Polymarket],
                category: Some(NormalizedCategory::Crypto),
                liquidity_gate: None,
            })
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].market_id, "P1");
    }

    #[test]
    fn liquidity_gate_drops_thin_and_unquoted_rows() {
        let store = RadarStore::open_in_memory().unwrap();
        let mut thin = snap(Provider::Kalshi, "thin", NormalizedCategory::Other);
        thin.liquidity_usd = 10.0;
        let mut unquoted = snap(Provider::Kalshi, "unquoted", NormalizedCategory::Other);
        unquoted.spread_pp = None;
        store
            .upsert_snapshots(&[
                snap(Provider::Kalshi, "ok", NormalizedCategory::Other),
                thin,
                unquoted,
            ])
            .unwrap();
        store.compute_deltas().unwrap();

        let rows = store
            .mover_rows(&MoverFilters {
                providers: vec![Provider::Kalshi],
                category: None,
                liquidity_gate: Some((5_000.0, 15.0)),
            })
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].market_id, "ok");
    }
}
