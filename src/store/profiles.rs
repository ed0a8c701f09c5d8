//! Market profile persistence (written only by the profiler).

use super::RadarStore;
use crate::models::{AnchorType, MarketProfile, Provider};
use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension};

/// Market fields the profiler needs to classify an anchor type.
#[derive(Debug, Clone)]
pub struct MarketForProfile {
    pub provider: Provider,
    pub market_id: String,
    pub title: String,
    pub raw_category: Option<String>,
    pub normalized_category: String,
    pub metadata_json: String,
}

impl RadarStore {
    /// Markets without a profile, or whose profile was produced by a
    /// different model version than the one now active. Bounded batch.
    pub fn markets_needing_profile(
        &self,
        active_model_version: &str,
        limit: usize,
    ) -> Result<Vec<MarketForProfile>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT m.provider, m.market_id, m.title, m.raw_category,
                        m.normalized_category, m.metadata_json
                 FROM markets m
                 LEFT JOIN market_profiles p
                   ON p.provider = m.provider AND p.market_id = m.market_id
                 WHERE p.market_id IS NULL OR p.model_version != ?1
                 ORDER BY m.updated_at DESC
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![active_model_version, limit as i64], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()
                .context("markets_needing_profile scan failed")?;

            Ok(rows
                .into_iter()
                .filter_map(|(provider, market_id, title, raw, cat, meta)| {
                    Provider::parse(&provider).map(|p| MarketForProfile {
                        provider: p,
                        market_id,
                        title,
                        raw_category: raw,
                        normalized_category: cat,
                        metadata_json: meta,
                    })
                })
                .collect())
        })
    }

    pub fn upsert_profile(&self, profile: &MarketProfile) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO market_profiles
                     (provider, market_id, anchor_type, insider_possible,
                      confidence, model_version, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (provider, market_id) DO UPDATE SET
                     anchor_type = excluded.anchor_type,
                     insider_possible = excluded.insider_possible,
                     confidence = excluded.confidence,
                     model_version = excluded.model_version,
                     updated_at = excluded.updated_at",
                params![
                    profile.provider.as_str(),
                    profile.market_id,
                    profile.anchor_type.as_str(),
                    profile.insider_possible,
                    profile.confidence,
                    profile.model_version,
                    profile.updated_at,
                ],
            )
            .context("profile upsert failed")?;
            Ok(())
        })
    }

    pub fn get_profile(&self, provider: Provider, market_id: &str) -> Result<Option<MarketProfile>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT anchor_type, insider_possible, confidence, model_version, updated_at
                 FROM market_profiles
                 WHERE provider = ?1 AND market_id = ?2",
            )?;
            let row = stmt
                .query_row(params![provider.as_str(), market_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, bool>(1)?,
                        row.get::<_, Option<f64>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                })
                .optional()?;

            Ok(row.and_then(
                |(anchor, insider_possible, confidence, model_version, updated_at)| {
                    AnchorType::parse(&anchor).map(|anchor_type| MarketProfile {
                        provider,
                        market_id: market_id.to_string(),
                        anchor_type,
                        insider_possible,
                        confidence,
                        model_version,
                        updated_at,
                    })
                },
            ))
        })
    }

    /// Labeled training rows for the anchor model: profiled markets with
    /// their text fields, restricted to confident profiles.
    pub fn labeled_markets_for_training(
        &self,
        min_confidence: f64,
    ) -> Result<Vec<(MarketForProfile, AnchorType)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT m.provider, m.market_id, m.title, m.raw_category,
                        m.normalized_category, m.metadata_json, p.anchor_type
                 FROM markets m
                 JOIN market_profiles p
                   ON p.provider = m.provider AND p.market_id = m.market_id
                 WHERE p.confidence IS NOT NULL AND p.confidence >= ?1
                 ORDER BY m.provider, m.market_id",
            )?;
            let rows = stmt
                .query_map(params![min_confidence], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()
                .context("training rows scan failed")?;

            Ok(rows
                .into_iter()
                .filter_map(|(provider, market_id, title, raw, cat, meta, anchor)| {
                    let provider = Provider::parse(&provider)?;
                    let anchor = AnchorType::parse(&anchor)?;
                    Some((
                        MarketForProfile {
                            provider,
                            market_id,
                            title,
                            raw_category: raw,
                            normalized_category: cat,
                            metadata_json: meta,
                        },
                        anchor,
                    ))
                })
                .collect())
        })
    }
}
