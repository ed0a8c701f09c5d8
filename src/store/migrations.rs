//! Numbered idempotent schema migrations.
//!
//! Applied migrations are tracked by name in `schema_migrations`; each file
//! runs inside its own transaction.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::debug;

pub const MIGRATIONS: &[(&str, &str)] = &[
    (
        "0001_markets_outcomes_snapshots.sql",
        r#"
CREATE TABLE IF NOT EXISTS markets (
    provider TEXT NOT NULL,
    market_id TEXT NOT NULL,
    title TEXT NOT NULL,
    raw_category TEXT,
    normalized_category TEXT NOT NULL,
    status TEXT NOT NULL,
    metadata_json TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (provider, market_id)
);

CREATE TABLE IF NOT EXISTS outcomes (
    provider TEXT NOT NULL,
    market_id TEXT NOT NULL,
    outcome_id TEXT NOT NULL,
    label TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (provider, market_id, outcome_id),
    FOREIGN KEY (provider, market_id)
        REFERENCES markets (provider, market_id)
        ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS snapshots (
    ts_minute INTEGER NOT NULL,
    provider TEXT NOT NULL,
    market_id TEXT NOT NULL,
    outcome_id TEXT NOT NULL,
    probability REAL NOT NULL,
    spread_pp REAL,
    volume_24h_usd REAL NOT NULL DEFAULT 0,
    liquidity_usd REAL NOT NULL DEFAULT 0,
    market_title TEXT NOT NULL,
    normalized_category TEXT NOT NULL,
    PRIMARY KEY (ts_minute, provider, market_id, outcome_id)
);

CREATE INDEX IF NOT EXISTS idx_snapshots_outcome_ts
    ON snapshots (provider, market_id, outcome_id, ts_minute DESC);
"#,
    ),
    (
        "0002_deltas.sql",
        r#"
CREATE TABLE IF NOT EXISTS deltas (
    ts_minute INTEGER NOT NULL,
    provider TEXT NOT NULL,
    market_id TEXT NOT NULL,
    outcome_id TEXT NOT NULL,
    delta_1m REAL,
    delta_5m REAL,
    delta_10m REAL,
    delta_30m REAL,
    delta_1h REAL,
    delta_6h REAL,
    delta_12h REAL,
    delta_24h REAL,
    PRIMARY KEY (ts_minute, provider, market_id, outcome_id)
);

CREATE INDEX IF NOT EXISTS idx_deltas_ts
    ON deltas (ts_minute DESC);
"#,
    ),
    (
        "0003_classifications.sql",
        r#"
CREATE TABLE IF NOT EXISTS classifications (
    ts_minute INTEGER NOT NULL,
    provider TEXT NOT NULL,
    market_id TEXT NOT NULL,
    outcome_id TEXT NOT NULL,
    opaque_score REAL NOT NULL,
    exogenous_score REAL NOT NULL,
    label TEXT NOT NULL,
    reasons_json TEXT NOT NULL DEFAULT '[]',
    model_version TEXT NOT NULL,
    PRIMARY KEY (ts_minute, provider, market_id, outcome_id)
);

CREATE INDEX IF NOT EXISTS idx_classifications_ts_label
    ON classifications (ts_minute DESC, label);
"#,
    ),
    (
        "0004_market_profiles.sql",
        r#"
CREATE TABLE IF NOT EXISTS market_profiles (
    provider TEXT NOT NULL,
    market_id TEXT NOT NULL,
    anchor_type TEXT NOT NULL,
    insider_possible INTEGER NOT NULL,
    confidence REAL,
    model_version TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (provider, market_id)
);
"#,
    ),
    (
        "0005_alert_state.sql",
        r#"
CREATE TABLE IF NOT EXISTS alert_state (
    signature TEXT PRIMARY KEY,
    last_sent_at INTEGER NOT NULL
);
"#,
    ),
];

/// Apply all pending migrations; returns how many ran.
pub fn run_migrations(conn: &Connection) -> Result<usize> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            name TEXT PRIMARY KEY,
            applied_at INTEGER NOT NULL
        );",
    )
    .context("Failed to create schema_migrations table")?;

    let mut applied = 0usize;
    for (name, sql) in MIGRATIONS {
        let already: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM schema_migrations WHERE name = ?1)",
                params![name],
                |row| row.get(0),
            )
            .context("Failed to check schema_migrations")?;
        if already {
            continue;
        }

        conn.execute_batch("BEGIN")?;
        let run = conn.execute_batch(sql).and_then(|_| {
            conn.execute(
                "INSERT INTO schema_migrations (name, applied_at) VALUES (?1, ?2)",
                params![name, Utc::now().timestamp()],
            )
            .map(|_| ())
        });
        match run {
            Ok(()) => {
                conn.execute_batch("COMMIT")?;
                debug!(migration = name, "migration applied");
                applied += 1;
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                return Err(e).with_context(|| format!("Migration {} failed", name));
            }
        }
    }

    Ok(applied)
}
