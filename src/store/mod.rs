//! SQLite-backed persistence for the radar pipeline.
//!
//! One connection in WAL mode behind a fast mutex; every writer owns a
//! disjoint set of rows and all writes are keyed upserts, so the single
//! serialized connection is enough coordination.

mod alerts;
mod classifications;
mod deltas;
pub mod migrations;
mod movers;
mod profiles;
mod snapshots;

pub use alerts::AlertCandidate;
pub use classifications::ClassifierInput;
pub use movers::{MoverFilters, MoverOutcomeRow};
pub use profiles::MarketForProfile;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use std::sync::Arc;
use tracing::{info, warn};

const PRAGMAS_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;
PRAGMA cache_size = -32000;
PRAGMA temp_store = MEMORY;
"#;

#[derive(Clone)]
pub struct RadarStore {
    conn: Arc<Mutex<Connection>>,
}

impl RadarStore {
    /// Open (creating if needed) the database, apply pragmas and run any
    /// pending migrations.
    pub fn open(db_path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("Failed to open database at {}", db_path))?;

        conn.execute_batch(PRAGMAS_SQL)
            .context("Failed to apply database pragmas")?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if journal_mode.to_lowercase() != "wal" {
            warn!("WAL mode not active, journal_mode = {}", journal_mode);
        }

        let applied = migrations::run_migrations(&conn)?;
        if applied > 0 {
            info!(applied, "applied schema migrations");
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection under the lock.
    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// WAL checkpoint before shutdown. Best-effort.
    pub fn checkpoint(&self) {
        let conn = self.conn.lock();
        let _ = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);");
    }

    /// Row count of one of the pipeline tables (diagnostics and tests).
    pub fn count_rows(&self, table: &str) -> Result<i64> {
        anyhow::ensure!(
            matches!(
                table,
                "markets"
                    | "outcomes"
                    | "snapshots"
                    | "deltas"
                    | "classifications"
                    | "market_profiles"
                    | "alert_state"
            ),
            "unknown table {}",
            table
        );
        self.with_conn(|conn| {
            Ok(conn.query_row(
                &format!("SELECT COUNT(*) FROM {}", table),
                [],
                |row| row.get(0),
            )?)
        })
    }
}
