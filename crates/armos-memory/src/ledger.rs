//! Position Ledger.
//!
//! Append-only record of every commanded position. The arm controller writes
//! one row after each successful calibration or move and reads the newest
//! row exactly once, at startup, to reseed its step bookkeeping.
//!
//! # Storage layout
//!
//! A single table `positions` is created (if it does not already exist):
//!
//! | column      | type    | description                                  |
//! |-------------|---------|----------------------------------------------|
//! | id          | INTEGER | insertion order, autoincrement primary key   |
//! | recorded_at | TEXT    | RFC-3339 time of the command (UTC)           |
//! | kind        | TEXT    | `joints` or `pose`                           |
//! | snapshot    | TEXT    | JSON-encoded [`PositionSnapshot`]            |
//!
//! `UPDATE` and `DELETE` are refused by triggers, so rows can only be added.
//! Every insert runs in its own transaction and rolls back as a whole.
//!
//! # Example
//!
//! ```rust
//! use armos_memory::{PositionStore, SqliteLedger};
//! use armos_types::PositionSnapshot;
//! use chrono::Utc;
//!
//! let mut ledger = SqliteLedger::open_in_memory().unwrap();
//! assert!(ledger.most_recent().unwrap().is_none());
//!
//! let joints = PositionSnapshot::Joints([0.1, 0.2, 0.3, 0.0, 0.0, 0.0, 0.0]);
//! ledger.record(&joints, Utc::now()).unwrap();
//!
//! let latest = ledger.most_recent().unwrap().unwrap();
//! assert_eq!(latest.snapshot, joints);
//! ```

use std::path::Path;

use armos_types::{PositionRecord, PositionSnapshot};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;
use tracing::debug;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from ledger operations.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Snapshot encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("Timestamp {attempted} precedes the latest record at {latest}")]
    NonMonotonic {
        latest: DateTime<Utc>,
        attempted: DateTime<Utc>,
    },
    #[error("Corrupt record {id}: {details}")]
    Corrupt { id: i64, details: String },
}

// ─────────────────────────────────────────────────────────────────────────────
// PositionStore
// ─────────────────────────────────────────────────────────────────────────────

/// Append-only storage of commanded positions.
pub trait PositionStore: Send {
    /// Append `snapshot` taken at `timestamp` and return the stored row.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NonMonotonic`] when `timestamp` is older than the
    /// newest row; storage errors otherwise. A failed call leaves the store
    /// unchanged.
    fn record(
        &mut self,
        snapshot: &PositionSnapshot,
        timestamp: DateTime<Utc>,
    ) -> Result<PositionRecord, LedgerError>;

    /// Newest row by insertion order, if any.
    fn most_recent(&self) -> Result<Option<PositionRecord>, LedgerError>;

    /// Up to `limit` newest rows, newest first.
    fn history(&self, limit: usize) -> Result<Vec<PositionRecord>, LedgerError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// SqliteLedger
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite-backed [`PositionStore`].
pub struct SqliteLedger {
    conn: Connection,
}

type RawRow = (i64, String, String);

fn kind_of(snapshot: &PositionSnapshot) -> &'static str {
    match snapshot {
        PositionSnapshot::Joints(_) => "joints",
        PositionSnapshot::Pose(_) => "pose",
    }
}

fn decode((id, recorded_at, snapshot): RawRow) -> Result<PositionRecord, LedgerError> {
    let timestamp = recorded_at
        .parse::<DateTime<Utc>>()
        .map_err(|e| LedgerError::Corrupt {
            id,
            details: e.to_string(),
        })?;
    let snapshot = serde_json::from_str(&snapshot).map_err(|e| LedgerError::Corrupt {
        id,
        details: e.to_string(),
    })?;
    Ok(PositionRecord {
        id,
        timestamp,
        snapshot,
    })
}

impl SqliteLedger {
    /// Open (or create) a persistent ledger at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let conn = Connection::open(path)?;
        let ledger = Self { conn };
        ledger.init_schema()?;
        Ok(ledger)
    }

    /// Open a temporary in-memory ledger (useful for testing).
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory()?;
        let ledger = Self { conn };
        ledger.init_schema()?;
        Ok(ledger)
    }

    fn init_schema(&self) -> Result<(), LedgerError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS positions (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                recorded_at TEXT NOT NULL,
                kind        TEXT NOT NULL CHECK (kind IN ('joints', 'pose')),
                snapshot    TEXT NOT NULL
            );
            CREATE TRIGGER IF NOT EXISTS positions_no_update
            BEFORE UPDATE ON positions
            BEGIN
                SELECT RAISE(ABORT, 'position ledger is append-only');
            END;
            CREATE TRIGGER IF NOT EXISTS positions_no_delete
            BEFORE DELETE ON positions
            BEGIN
                SELECT RAISE(ABORT, 'position ledger is append-only');
            END;",
        )?;
        Ok(())
    }

    /// Number of rows.
    pub fn len(&self) -> Result<usize, LedgerError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM positions", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    pub fn is_empty(&self) -> Result<bool, LedgerError> {
        Ok(self.len()? == 0)
    }

    fn latest_row(conn: &Connection) -> Result<Option<RawRow>, LedgerError> {
        let row = conn
            .query_row(
                "SELECT id, recorded_at, snapshot
                 FROM positions
                 ORDER BY id DESC
                 LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        Ok(row)
    }
}

impl PositionStore for SqliteLedger {
    fn record(
        &mut self,
        snapshot: &PositionSnapshot,
        timestamp: DateTime<Utc>,
    ) -> Result<PositionRecord, LedgerError> {
        let encoded = serde_json::to_string(snapshot)?;
        let tx = self.conn.transaction()?;

        if let Some(latest) = Self::latest_row(&tx)? {
            let latest = decode(latest)?.timestamp;
            if timestamp < latest {
                return Err(LedgerError::NonMonotonic {
                    latest,
                    attempted: timestamp,
                });
            }
        }

        tx.execute(
            "INSERT INTO positions (recorded_at, kind, snapshot) VALUES (?1, ?2, ?3)",
            params![
                timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
                kind_of(snapshot),
                encoded,
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        debug!(id, kind = kind_of(snapshot), "position recorded");
        Ok(PositionRecord {
            id,
            timestamp,
            snapshot: *snapshot,
        })
    }

    fn most_recent(&self) -> Result<Option<PositionRecord>, LedgerError> {
        Self::latest_row(&self.conn)?.map(decode).transpose()
    }

    fn history(&self, limit: usize) -> Result<Vec<PositionRecord>, LedgerError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare(
            "SELECT id, recorded_at, snapshot
             FROM positions
             ORDER BY id DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(decode(row?)?);
        }
        Ok(records)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
