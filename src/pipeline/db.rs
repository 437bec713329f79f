//! Durable trade store used for deduplication
//!
//! The pipeline only asks one question of storage: "is this trade_id new?".
//! `admit` answers it by inserting the raw trade with `INSERT OR IGNORE` against
//! a `UNIQUE(trade_id)` column, so the audit log and the dedupe check are the
//! same write.

use super::types::TradeEvent;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::Connection;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Schema directory not found: {0}")]
    SchemaDirMissing(String),
    #[error("Store lock poisoned")]
    Poisoned,
}

/// Dedupe boundary in front of the pipeline
#[async_trait]
pub trait TradeLedger: Send + Sync {
    /// Record the trade; Ok(true) if its trade_id was not seen before
    async fn admit(&self, trade: &TradeEvent) -> Result<bool, StoreError>;
}

/// Run schema migrations from SQL files
///
/// Reads all .sql files from `schema_dir` in filename order and executes them.
/// Files must use "IF NOT EXISTS" clauses so reruns are no-ops.
pub fn run_schema_migrations(conn: &mut Connection, schema_dir: &str) -> Result<(), StoreError> {
    let schema_path = Path::new(schema_dir);

    if !schema_path.exists() {
        return Err(StoreError::SchemaDirMissing(schema_dir.to_string()));
    }

    conn.pragma_update(None, "journal_mode", "WAL")?;
    log::info!("📊 Enabled WAL mode for SQLite database");

    let mut sql_files: Vec<_> = fs::read_dir(schema_path)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().and_then(|s| s.to_str()) == Some("sql"))
        .collect();

    sql_files.sort_by_key(|entry| entry.file_name());

    log::info!("🔧 Running schema migrations from: {}", schema_dir);

    for entry in sql_files {
        let path = entry.path();
        let filename = entry.file_name().to_string_lossy().into_owned();

        log::info!("   ├─ Executing: {}", filename);
        let sql_content = fs::read_to_string(&path)?;
        conn.execute_batch(&sql_content)?;
        log::info!("   └─ ✅ Success: {}", filename);
    }

    log::info!("✅ All schema migrations completed successfully");

    Ok(())
}

/// SQLite-backed trade ledger
pub struct SqliteTradeStore {
    conn: Arc<Mutex<Connection>>,
    env: String,
}

impl SqliteTradeStore {
    /// Open (or create) the database and apply the schema from `schema_dir`
    pub fn open(db_path: &str, schema_dir: &str, env: &str) -> Result<Self, StoreError> {
        let mut conn = Connection::open(db_path)?;
        run_schema_migrations(&mut conn, schema_dir)?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            env: env.to_string(),
        })
    }

    /// Number of stored trades
    pub fn count(&self) -> Result<u64, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM trades", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl TradeLedger for SqliteTradeStore {
    async fn admit(&self, trade: &TradeEvent) -> Result<bool, StoreError> {
        let raw_json = serde_json::to_string(trade)?;
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;

        let inserted = conn.execute(
            r#"
            INSERT OR IGNORE INTO trades (
                trade_id, market_ticker, price, contracts, side,
                occurred_at, received_at_ms, env, raw_json
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            rusqlite::params![
                trade.trade_id,
                trade.ticker,
                trade.price.to_string(),
                trade.size as i64,
                trade.side.as_str(),
                trade.occurred_at.timestamp(),
                Utc::now().timestamp_millis(),
                self.env,
                raw_json,
            ],
        )?;

        Ok(inserted == 1)
    }
}

/// In-process ledger for replays and tests; forgets everything on exit
#[derive(Default)]
pub struct MemoryLedger {
    seen: Mutex<HashSet<String>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TradeLedger for MemoryLedger {
    async fn admit(&self, trade: &TradeEvent) -> Result<bool, StoreError> {
        let mut seen = self.seen.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(seen.insert(trade.trade_id.clone()))
    }
}
