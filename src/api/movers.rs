//! The movers endpoint: latest-tick outcome rows grouped into market rows
//! ranked by a chosen window's delta.

use super::ApiState;
use crate::models::{NormalizedCategory, Provider, Window};
use crate::store::{MoverFilters, MoverOutcomeRow};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::error;

const DEFAULT_MIN_LIQUIDITY: f64 = 5_000.0;
const DEFAULT_MAX_SPREAD: f64 = 15.0;
const DEFAULT_PAGE_SIZE: usize = 50;
const MIN_PAGE_SIZE: usize = 10;
const MAX_PAGE_SIZE: usize = 100;

/// Raw query parameters; everything is optional and leniently parsed.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoversQuery {
    pub providers: Option<String>,
    pub category: Option<String>,
    pub tab: Option<String>,
    pub sort_window: Option<String>,
    pub sort: Option<String>,
    pub include_low_liquidity: Option<String>,
    pub min_liquidity: Option<f64>,
    pub max_spread: Option<f64>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tab {
    Opaque,
    Exogenous,
    All,
}

/// Query parameters after defaults and clamping.
#[derive(Debug, Clone)]
pub struct ResolvedQuery {
    pub providers: Vec<Provider>,
    pub category: Option<NormalizedCategory>,
    pub tab: Tab,
    pub sort_window: Window,
    pub descending: bool,
    pub liquidity_gate: Option<(f64, f64)>,
    pub page: usize,
    pub page_size: usize,
}

pub fn resolve_query(raw: &MoversQuery) -> ResolvedQuery {
    let mut providers: Vec<Provider> = raw
        .providers
        .as_deref()
        .unwrap_or("")
        .split(',')
        .filter_map(Provider::parse)
        .collect();
    providers.dedup();
    if providers.is_empty() {
        providers = vec![Provider::Polymarket, Provider::Kalshi];
    }

    let category = raw
        .category
        .as_deref()
        .filter(|c| !c.eq_ignore_ascii_case("all"))
        .and_then(NormalizedCategory::parse);

    let tab = match raw.tab.as_deref() {
        Some("opaque") => Tab::Opaque,
        Some("exogenous") => Tab::Exogenous,
        _ => Tab::All,
    };

    let sort_window = raw
        .sort_window
        .as_deref()
        .and_then(Window::parse)
        .unwrap_or(Window::H1);

    let descending = !matches!(raw.sort.as_deref(), Some("asc"));

    let include_low_liquidity = raw
        .include_low_liquidity
        .as_deref()
        .map(|v| matches!(v, "1" | "true" | "TRUE" | "on"))
        .unwrap_or(false);
    let liquidity_gate = if include_low_liquidity {
        None
    } else {
        Some((
            raw.min_liquidity.unwrap_or(DEFAULT_MIN_LIQUIDITY),
            raw.max_spread.unwrap_or(DEFAULT_MAX_SPREAD),
        ))
    };

    let page = raw.page.unwrap_or(1).max(1) as usize;
    let page_size = raw
        .page_size
        .unwrap_or(DEFAULT_PAGE_SIZE as i64)
        .clamp(MIN_PAGE_SIZE as i64, MAX_PAGE_SIZE as i64) as usize;

    ResolvedQuery {
        providers,
        category,
        tab,
        sort_window,
        descending,
        liquidity_gate,
        page,
        page_size,
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeRow {
    pub outcome_id: String,
    pub outcome_label: String,
    pub probability: f64,
    pub spread_pp: Option<f64>,
    pub volume_24h_usd: f64,
    pub liquidity_usd: f64,
    pub label: Option<String>,
    pub deltas: BTreeMap<String, Option<f64>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketRow {
    pub provider: String,
    pub market_id: String,
    pub market_title: String,
    pub normalized_category: String,
    pub label: Option<String>,
    pub reason_tags: Vec<String>,
    pub lead_outcome_id: String,
    pub market_meta: Value,
    pub outcomes: Vec<OutcomeRow>,
    pub timestamp: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoversMeta {
    pub sort_window: String,
    pub sort: String,
    pub page: usize,
    pub page_size: usize,
    pub total_rows: usize,
    pub total_pages: usize,
}

#[derive(Debug, Serialize)]
pub struct MoversResponse {
    pub data: Vec<MarketRow>,
    pub meta: MoversMeta,
}

fn tab_matches(tab: Tab, label: Option<&str>) -> bool {
    match tab {
        Tab::All => true,
        Tab::Opaque => label == Some("opaque_info_sensitive"),
        Tab::Exogenous => label == Some("exogenous_arbitrage"),
    }
}

/// Compare two optional deltas under the sort direction, None always
/// losing (NULLs last).
fn better_lead(candidate: Option<f64>, current: Option<f64>, descending: bool) -> bool {
    match (candidate, current) {
        (Some(c), Some(b)) => {
            if descending {
                c > b
            } else {
                c < b
            }
        }
        (Some(_), None) => true,
        _ => false,
    }
}

/// Group filtered rows into ranked market rows and paginate.
pub fn build_movers_response(rows: Vec<MoverOutcomeRow>, query: &ResolvedQuery) -> MoversResponse {
    // Group every fetched outcome by market; remember each market's lead
    // among tab-qualifying outcomes.
    let mut groups: BTreeMap<(String, String), Vec<usize>> = BTreeMap::new();
    for (idx, row) in rows.iter().enumerate() {
        groups
            .entry((row.provider.as_str().to_string(), row.market_id.clone()))
            .or_default()
            .push(idx);
    }

    struct MarketGroup {
        lead_idx: usize,
        lead_delta: Option<f64>,
        member_idxs: Vec<usize>,
    }

    let mut markets: Vec<MarketGroup> = Vec::new();
    for (_, member_idxs) in groups {
        let mut lead: Option<(usize, Option<f64>)> = None;
        for &idx in &member_idxs {
            let row = &rows[idx];
            if !tab_matches(query.tab, row.classification_label.as_deref()) {
                continue;
            }
            let delta = row.deltas.get(query.sort_window);
            match &lead {
                None => lead = Some((idx, delta)),
                Some((_, current)) => {
                    if better_lead(delta, *current, query.descending) {
                        lead = Some((idx, delta));
                    }
                }
            }
        }
        // Markets with no tab-qualifying outcome drop out entirely.
        if let Some((lead_idx, lead_delta)) = lead {
            markets.push(MarketGroup {
                lead_idx,
                lead_delta,
                member_idxs,
            });
        }
    }

    // Rank markets by lead delta, NULLs last; key order keeps ties stable.
    markets.sort_by(|a, b| match (a.lead_delta, b.lead_delta) {
        (Some(x), Some(y)) => {
            if query.descending {
                y.total_cmp(&x)
            } else {
                x.total_cmp(&y)
            }
        }
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });

    let total_rows = markets.len();
    let total_pages = total_rows.div_ceil(query.page_size);
    let offset = (query.page - 1) * query.page_size;

    let data: Vec<MarketRow> = markets
        .into_iter()
        .skip(offset)
        .take(query.page_size)
        .map(|group| {
            let lead = &rows[group.lead_idx];

            let mut member_rows: Vec<&MoverOutcomeRow> =
                group.member_idxs.iter().map(|&i| &rows[i]).collect();
            // Within a market, order outcomes by |delta| on the sort
            // window, strongest first, NULLs last.
            member_rows.sort_by(|a, b| {
                let da = a.deltas.get(query.sort_window).map(f64::abs);
                let db = b.deltas.get(query.sort_window).map(f64::abs);
                match (da, db) {
                    (Some(x), Some(y)) => y.total_cmp(&x),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                }
            });

            let outcomes = member_rows
                .into_iter()
                .map(|row| OutcomeRow {
                    outcome_id: row.outcome_id.clone(),
                    outcome_label: row.outcome_label.clone(),
                    probability: row.probability,
                    spread_pp: row.spread_pp,
                    volume_24h_usd: row.volume_24h_usd,
                    liquidity_usd: row.liquidity_usd,
                    label: row.classification_label.clone(),
                    deltas: Window::ALL
                        .iter()
                        .map(|w| (w.as_str().to_string(), row.deltas.get(*w)))
                        .collect(),
                })
                .collect();

            MarketRow {
                provider: lead.provider.as_str().to_string(),
                market_id: lead.market_id.clone(),
                market_title: lead.market_title.clone(),
                normalized_category: lead.normalized_category.clone(),
                label: lead.classification_label.clone(),
                reason_tags: lead.reasons.clone(),
                lead_outcome_id: lead.outcome_id.clone(),
                market_meta: serde_json::from_str(&lead.market_metadata_json)
                    .unwrap_or(Value::Null),
                outcomes,
                timestamp: lead.ts_minute,
            }
        })
        .collect();

    MoversResponse {
        data,
        meta: MoversMeta {
            sort_window: query.sort_window.as_str().to_string(),
            sort: if query.descending { "desc" } else { "asc" }.to_string(),
            page: query.page,
            page_size: query.page_size,
            total_rows,
            total_pages,
        },
    }
}

/// GET /api/movers
pub async fn get_movers(
    State(state): State<ApiState>,
    Query(raw): Query<MoversQuery>,
) -> Result<Json<MoversResponse>, (StatusCode, Json<Value>)> {
    let query = resolve_query(&raw);
    let filters = MoverFilters {
        providers: query.providers.clone(),
        category: query.category,
        liquidity_gate: query.liquidity_gate,
    };

    let rows = state.store.mover_rows(&filters).map_err(|e| {
        // Internals never leak to the dashboard.
        error!(error = %e, "movers query failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": "Failed to load movers."})),
        )
    })?;

    Ok(Json(build_movers_response(rows, &query)))
}
