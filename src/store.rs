//! Bar Storage
//! SQLite-backed OHLCV history, one row per (symbol, timestamp).
//!
//! Timestamps are stored as `YYYY-MM-DD HH:MM:SS[.fff]` text, which sorts
//! chronologically, so range scans and ordering run straight off the
//! `(symbol, timestamp)` index.

use crate::models::{Bar, BarRecord};
use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use std::sync::Arc;
use tracing::{debug, info};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS stocks (
    symbol TEXT PRIMARY KEY,
    name TEXT,
    exchange TEXT
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS bars (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL REFERENCES stocks(symbol),
    timestamp TEXT NOT NULL,
    open REAL NOT NULL,
    high REAL NOT NULL,
    low REAL NOT NULL,
    close REAL NOT NULL,
    volume REAL NOT NULL,
    CONSTRAINT uq_symbol_timestamp UNIQUE (symbol, timestamp)
);

CREATE INDEX IF NOT EXISTS idx_bars_symbol_ts ON bars(symbol, timestamp);
"#;

/// Canonical symbol form used for every lookup.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

/// Bar history shared across request handlers.
#[derive(Clone)]
pub struct BarStore {
    conn: Arc<Mutex<Connection>>,
}

impl BarStore {
    /// Open (or create) the database at `db_path`.
    pub fn open(db_path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("Failed to open bar database at {}", db_path))?;
        let store = Self::init(conn)?;
        info!("📊 Bar database ready at: {}", db_path);
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize bar schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert bars for `symbol`, replacing rows with the same timestamp.
    /// Returns the number of rows written.
    pub fn insert_bars(&self, symbol: &str, records: &[BarRecord]) -> Result<usize> {
        let symbol = normalize_symbol(symbol);
        let mut conn = self.conn.lock();
        let tx = conn.transaction().context("Failed to begin insert")?;

        tx.execute(
            "INSERT OR IGNORE INTO stocks (symbol) VALUES (?1)",
            params![symbol],
        )?;

        let mut written = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO bars (symbol, timestamp, open, high, low, close, volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for r in records {
                written += stmt.execute(params![
                    symbol,
                    r.timestamp,
                    r.open,
                    r.high,
                    r.low,
                    r.close,
                    r.volume
                ])?;
            }
        }

        tx.commit().context("Failed to commit bars")?;
        debug!(symbol = %symbol, rows = written, "bars stored");
        Ok(written)
    }

    /// Bars for `symbol` with `start <= timestamp <= end`, oldest first.
    pub fn load_range(
        &self,
        symbol: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Bar>> {
        let symbol = normalize_symbol(symbol);
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT symbol, timestamp, open, high, low, close, volume
             FROM bars
             WHERE symbol = ?1 AND timestamp >= ?2 AND timestamp <= ?3
             ORDER BY timestamp ASC",
        )?;

        let bars = stmt
            .query_map(params![symbol, start, end], |row| {
                Ok(Bar {
                    symbol: row.get(0)?,
                    timestamp: row.get(1)?,
                    open: row.get(2)?,
                    high: row.get(3)?,
                    low: row.get(4)?,
                    close: row.get(5)?,
                    volume: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("Failed to load bars for {}", symbol))?;

        Ok(bars)
    }

    /// Distinct symbols with stored bars, sorted.
    pub fn symbols(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT DISTINCT symbol FROM bars ORDER BY symbol")?;
        let symbols = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(symbols)
    }

    /// Calendar dates with at least one bar, ascending.
    pub fn trade_dates(&self, symbol: &str) -> Result<Vec<NaiveDate>> {
        let symbol = normalize_symbol(symbol);
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT substr(timestamp, 1, 10) AS trade_date
             FROM bars
             WHERE symbol = ?1
             ORDER BY trade_date",
        )?;
        let dates = stmt
            .query_map(params![symbol], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<NaiveDate>>>()?;
        Ok(dates)
    }

    /// All bars of one calendar day, oldest first.
    pub fn day_bars(&self, symbol: &str, date: NaiveDate) -> Result<Vec<BarRecord>> {
        let symbol = normalize_symbol(symbol);
        let start = date.and_time(chrono::NaiveTime::MIN);
        let end = start + Duration::days(1);

        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT timestamp, open, high, low, close, volume
             FROM bars
             WHERE symbol = ?1 AND timestamp >= ?2 AND timestamp < ?3
             ORDER BY timestamp ASC",
        )?;
        let bars = stmt
            .query_map(params![symbol, start, end], |row| {
                Ok(BarRecord {
                    timestamp: row.get(0)?,
                    open: row.get(1)?,
                    high: row.get(2)?,
                    low: row.get(3)?,
                    close: row.get(4)?,
                    volume: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(bars)
    }

    /// Earliest and latest bar timestamps, if the symbol has any bars.
    pub fn date_range(&self, symbol: &str) -> Result<Option<(NaiveDateTime, NaiveDateTime)>> {
        let symbol = normalize_symbol(symbol);
        let conn = self.conn.lock();
        let (min, max): (Option<NaiveDateTime>, Option<NaiveDateTime>) = conn.query_row(
            "SELECT MIN(timestamp), MAX(timestamp) FROM bars WHERE symbol = ?1",
            params![symbol],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(min.zip(max))
    }
}
