//! Append-only store of records captured on the device.
//!
//! A record enters as `Captured` and keeps its `client_record_id` for life.
//! It moves to `Uploaded` while a batch containing it is in flight, then to
//! `Applied` or `Rejected` from the server's answer. An upload that never got
//! an answer is reset to `Captured` and resent with the same id.
//!
//! The same SQLite file also keeps the provisioning snapshot, so the device
//! can verify after a restart without a network.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use fop_shared::sync::{RecordOutcome, SyncRecord};
use fop_shared::types::{RecordKind, RecordState};

use crate::error::{DeviceError, Result};

const SCHEMA_VERSION: u32 = 1;

const COLUMNS: &str = "seq, client_record_id, kind, body, state, rejection_reason, server_id,
     captured_at, last_attempt_at, settled_at";

/// One ledger row.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub seq: i64,
    pub client_record_id: String,
    pub kind: RecordKind,
    pub record: SyncRecord,
    pub state: RecordState,
    pub rejection_reason: Option<String>,
    pub server_id: Option<Uuid>,
    pub captured_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerCounts {
    pub captured: u32,
    pub uploaded: u32,
    pub applied: u32,
    pub rejected: u32,
}

impl LedgerCounts {
    /// Records still waiting for a server answer.
    pub fn unsettled(&self) -> u32 {
        self.captured + self.uploaded
    }
}

/// What applying one server response changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub applied: u32,
    pub rejected: u32,
    /// Outcomes naming a record this ledger does not hold.
    pub unmatched: u32,
}

pub struct Ledger {
    conn: Connection,
}

impl Ledger {
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        info!(path = %path.display(), "opening ledger");

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if version < 1 {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS ledger_entries (
                    seq               INTEGER PRIMARY KEY AUTOINCREMENT,
                    client_record_id  TEXT NOT NULL UNIQUE,
                    kind              TEXT NOT NULL,
                    body              TEXT NOT NULL,
                    state             TEXT NOT NULL,
                    rejection_reason  TEXT,
                    server_id         TEXT,
                    captured_at       TEXT NOT NULL,
                    last_attempt_at   TEXT,
                    settled_at        TEXT
                );
                CREATE INDEX IF NOT EXISTS idx_ledger_state ON ledger_entries(state, seq);

                CREATE TABLE IF NOT EXISTS provisioning (
                    key         TEXT PRIMARY KEY,
                    json        TEXT NOT NULL,
                    updated_at  TEXT NOT NULL
                );",
            )
            .map_err(|e| DeviceError::Migration(e.to_string()))?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }
        Ok(Self { conn })
    }

    // -- records --

    /// Append a freshly captured record.
    ///
    /// A second append with the same `client_record_id` is refused: one
    /// logical action gets exactly one ledger row.
    pub fn append(&self, record: &SyncRecord, captured_at: DateTime<Utc>) -> Result<i64> {
        let id = record.client_record_id();
        if id.trim().is_empty() {
            return Err(DeviceError::InvalidRecord("clientRecordId must not be empty".into()));
        }

        let body = serde_json::to_string(record)?;
        let inserted = self.conn.execute(
            "INSERT INTO ledger_entries (client_record_id, kind, body, state, captured_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id,
                record.kind().as_str(),
                body,
                RecordState::Captured.as_str(),
                captured_at.to_rfc3339(),
            ],
        );

        match inserted {
            Ok(_) => {
                debug!(client_record_id = id, kind = %record.kind(), "record captured");
                Ok(self.conn.last_insert_rowid())
            }
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(DeviceError::DuplicateRecord(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn entry(&self, client_record_id: &str) -> Result<Option<LedgerEntry>> {
        let sql = format!("SELECT {COLUMNS} FROM ledger_entries WHERE client_record_id = ?1");
        let entry = self
            .conn
            .query_row(&sql, params![client_record_id], row_to_entry)
            .optional()?;
        Ok(entry)
    }

    /// Oldest `Captured` records, in capture order.
    pub fn next_batch(&self, limit: usize) -> Result<Vec<LedgerEntry>> {
        self.entries_in(RecordState::Captured, limit)
    }

    /// Records the server refused, for officer review.
    pub fn rejected(&self, limit: usize) -> Result<Vec<LedgerEntry>> {
        self.entries_in(RecordState::Rejected, limit)
    }

    fn entries_in(&self, state: RecordState, limit: usize) -> Result<Vec<LedgerEntry>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM ledger_entries WHERE state = ?1 ORDER BY seq ASC LIMIT ?2"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![state.as_str(), limit as i64], row_to_entry)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    /// Move records to `Uploaded` just before their batch is sent.
    pub fn mark_uploaded(&mut self, ids: &[String], now: DateTime<Utc>) -> Result<()> {
        let tx = self.conn.transaction()?;
        for id in ids {
            let state = state_of(&tx, id)?.ok_or_else(|| {
                DeviceError::InvalidRecord(format!("record {id} is not in the ledger"))
            })?;
            let next = state.transition(RecordState::Uploaded)?;
            tx.execute(
                "UPDATE ledger_entries SET state = ?1, last_attempt_at = ?2 WHERE client_record_id = ?3",
                params![next.as_str(), now.to_rfc3339(), id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Return every `Uploaded` record to `Captured`.
    ///
    /// Called after a failed upload, and at start-up for uploads a crash
    /// interrupted. Resending is safe: the server deduplicates by id.
    pub fn reset_uploaded(&self) -> Result<usize> {
        let reset = self.conn.execute(
            "UPDATE ledger_entries SET state = ?1 WHERE state = ?2",
            params![RecordState::Captured.as_str(), RecordState::Uploaded.as_str()],
        )?;
        if reset > 0 {
            debug!(reset, "uploaded records returned to captured");
        }
        Ok(reset)
    }

    /// Return the named records to `Captured` if they are still `Uploaded`,
    /// i.e. the server's response did not settle them.
    pub fn reset_ids(&mut self, ids: &[String]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut reset = 0;
        for id in ids {
            reset += tx.execute(
                "UPDATE ledger_entries SET state = ?1 WHERE client_record_id = ?2 AND state = ?3",
                params![RecordState::Captured.as_str(), id, RecordState::Uploaded.as_str()],
            )?;
        }
        tx.commit()?;
        Ok(reset)
    }

    /// Apply per-record outcomes from a sync response.
    ///
    /// `Applied` and `AlreadyApplied` both settle a record as `Applied`;
    /// `Rejected` keeps the server's reason. Records already terminal are
    /// left alone.
    pub fn apply_outcomes(
        &mut self,
        outcomes: &[RecordOutcome],
        now: DateTime<Utc>,
    ) -> Result<ApplySummary> {
        let mut summary = ApplySummary::default();
        let tx = self.conn.transaction()?;

        for outcome in outcomes {
            let Some(state) = state_of(&tx, &outcome.client_record_id)? else {
                warn!(client_record_id = %outcome.client_record_id, "outcome for unknown record");
                summary.unmatched += 1;
                continue;
            };
            if state.is_terminal() {
                continue;
            }

            let target = if outcome.status.is_settled() {
                RecordState::Applied
            } else {
                RecordState::Rejected
            };
            let next = state.transition(target)?;

            tx.execute(
                "UPDATE ledger_entries
                 SET state = ?1, server_id = ?2, rejection_reason = ?3, settled_at = ?4
                 WHERE client_record_id = ?5",
                params![
                    next.as_str(),
                    outcome.server_id.map(|id| id.to_string()),
                    outcome.reason,
                    now.to_rfc3339(),
                    outcome.client_record_id,
                ],
            )?;

            match next {
                RecordState::Applied => summary.applied += 1,
                _ => summary.rejected += 1,
            }
        }

        tx.commit()?;
        Ok(summary)
    }

    /// Delete `Applied` records settled before `cutoff`. Rejected and
    /// unsettled records are never pruned.
    pub fn prune_applied(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let pruned = self.conn.execute(
            "DELETE FROM ledger_entries WHERE state = ?1 AND settled_at < ?2",
            params![RecordState::Applied.as_str(), cutoff.to_rfc3339()],
        )?;
        if pruned > 0 {
            info!(pruned, "pruned applied records");
        }
        Ok(pruned)
    }

    pub fn counts(&self) -> Result<LedgerCounts> {
        let mut stmt = self
            .conn
            .prepare("SELECT state, COUNT(*) FROM ledger_entries GROUP BY state")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?))
        })?;

        let mut counts = LedgerCounts::default();
        for row in rows {
            let (state, n) = row?;
            match state.parse::<RecordState>() {
                Ok(RecordState::Captured) => counts.captured = n,
                Ok(RecordState::Uploaded) => counts.uploaded = n,
                Ok(RecordState::Applied) => counts.applied = n,
                Ok(RecordState::Rejected) => counts.rejected = n,
                Err(e) => warn!(error = %e, "unexpected ledger state"),
            }
        }
        Ok(counts)
    }

    // -- provisioning snapshot --

    pub fn save_provisioning<T: Serialize>(&self, key: &str, value: &T, now: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "INSERT INTO provisioning (key, json, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET json = excluded.json, updated_at = excluded.updated_at",
            params![key, serde_json::to_string(value)?, now.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn load_provisioning<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT json FROM provisioning WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| serde_json::from_str(&j).map_err(DeviceError::from))
            .transpose()
    }
}

fn state_of(conn: &Connection, client_record_id: &str) -> Result<Option<RecordState>> {
    let state: Option<String> = conn
        .query_row(
            "SELECT state FROM ledger_entries WHERE client_record_id = ?1",
            params![client_record_id],
            |row| row.get(0),
        )
        .optional()?;
    state
        .map(|s| {
            s.parse::<RecordState>()
                .map_err(|e| DeviceError::InvalidRecord(e.to_string()))
        })
        .transpose()
}

fn conversion_error<E>(col: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(err))
}

fn timestamp(row: &rusqlite::Row<'_>, col: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(col)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_error(col, e))
    })
    .transpose()
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<LedgerEntry> {
    let kind: String = row.get(2)?;
    let body: String = row.get(3)?;
    let state: String = row.get(4)?;
    let server_id: Option<String> = row.get(6)?;

    Ok(LedgerEntry {
        seq: row.get(0)?,
        client_record_id: row.get(1)?,
        kind: kind.parse().map_err(|e| conversion_error(2, e))?,
        record: serde_json::from_str(&body).map_err(|e| conversion_error(3, e))?,
        state: state.parse().map_err(|e| conversion_error(4, e))?,
        rejection_reason: row.get(5)?,
        server_id: server_id
            .map(|s| Uuid::parse_str(&s).map_err(|e| conversion_error(6, e)))
            .transpose()?,
        captured_at: timestamp(row, 7)?.ok_or(rusqlite::Error::InvalidColumnType(
            7,
            "captured_at".into(),
            rusqlite::types::Type::Null,
        ))?,
        last_attempt_at: timestamp(row, 8)?,
        settled_at: timestamp(row, 9)?,
    })
}
