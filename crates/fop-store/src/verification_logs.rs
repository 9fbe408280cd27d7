use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::columns::{enum_col, location_cols, timestamp_col, uuid_col};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{InsertOutcome, VerificationLog};

const COLUMNS: &str = "id, client_record_id, device_id, officer_id, officer_name,
     scanned_raw_content, permit_id, permit_number, result, failure_reason,
     latitude, longitude, accuracy_meters, airport, verified_at, scan_duration_ms,
     was_offline, synced_at";

impl Database {
    /// Persist a verification attempt unless one with the same
    /// `client_record_id` is already stored.
    ///
    /// The check and the write are a single statement, so two concurrent
    /// deliveries of the same record cannot both insert.
    pub fn insert_verification_log(&self, log: &VerificationLog) -> Result<InsertOutcome> {
        let scan_duration_ms = log
            .scan_duration_ms
            .map(i64::try_from)
            .transpose()
            .map_err(|_| StoreError::Invalid("scan duration is out of range".into()))?;
        let (latitude, longitude, accuracy) = match log.location {
            Some(loc) => (Some(loc.latitude), Some(loc.longitude), loc.accuracy_meters),
            None => (None, None, None),
        };

        let inserted = self.conn().execute(
            "INSERT INTO verification_logs
                (id, client_record_id, device_id, officer_id, officer_name,
                 scanned_raw_content, permit_id, permit_number, result, failure_reason,
                 latitude, longitude, accuracy_meters, airport, verified_at,
                 scan_duration_ms, was_offline, synced_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
             ON CONFLICT(client_record_id) DO NOTHING",
            params![
                log.id.to_string(),
                log.client_record_id,
                log.device_id,
                log.officer_id,
                log.officer_name,
                log.scanned_raw_content,
                log.permit_id,
                log.permit_number,
                log.result.as_str(),
                log.failure_reason,
                latitude,
                longitude,
                accuracy,
                log.airport,
                log.verified_at.to_rfc3339(),
                scan_duration_ms,
                log.was_offline_verification,
                log.synced_at.to_rfc3339(),
            ],
        )?;

        if inserted == 1 {
            return Ok(InsertOutcome::Inserted(log.id));
        }

        let existing = self
            .find_verification_log_id(&log.client_record_id)?
            .ok_or(StoreError::NotFound)?;
        Ok(InsertOutcome::Existing(existing))
    }

    /// Server id of an already reconciled record.
    pub fn find_verification_log_id(&self, client_record_id: &str) -> Result<Option<Uuid>> {
        let id = self
            .conn()
            .query_row(
                "SELECT id FROM verification_logs WHERE client_record_id = ?1",
                params![client_record_id],
                |row| uuid_col(row, 0),
            )
            .optional()?;
        Ok(id)
    }

    pub fn get_verification_log_by_client_id(
        &self,
        client_record_id: &str,
    ) -> Result<Option<VerificationLog>> {
        let sql = format!("SELECT {COLUMNS} FROM verification_logs WHERE client_record_id = ?1");
        let log = self
            .conn()
            .query_row(&sql, params![client_record_id], row_to_verification_log)
            .optional()?;
        Ok(log)
    }

    pub fn count_verification_logs(&self, client_record_id: &str) -> Result<u32> {
        let count = self.conn().query_row(
            "SELECT COUNT(*) FROM verification_logs WHERE client_record_id = ?1",
            params![client_record_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn total_verification_logs(&self) -> Result<u32> {
        let count = self
            .conn()
            .query_row("SELECT COUNT(*) FROM verification_logs", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Most recent verification attempts for a permit.
    pub fn verification_history(&self, permit_id: &str, limit: u32) -> Result<Vec<VerificationLog>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM verification_logs
             WHERE permit_id = ?1
             ORDER BY verified_at DESC
             LIMIT ?2"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params![permit_id, limit], row_to_verification_log)?;

        let mut logs = Vec::new();
        for row in rows {
            logs.push(row?);
        }
        Ok(logs)
    }
}

fn row_to_verification_log(row: &rusqlite::Row<'_>) -> rusqlite::Result<VerificationLog> {
    let scan_duration_ms: Option<i64> = row.get(15)?;
    Ok(VerificationLog {
        id: uuid_col(row, 0)?,
        client_record_id: row.get(1)?,
        device_id: row.get(2)?,
        officer_id: row.get(3)?,
        officer_name: row.get(4)?,
        scanned_raw_content: row.get(5)?,
        permit_id: row.get(6)?,
        permit_number: row.get(7)?,
        result: enum_col(row, 8)?,
        failure_reason: row.get(9)?,
        location: location_cols(row, 10)?,
        airport: row.get(13)?,
        verified_at: timestamp_col(row, 14)?,
        scan_duration_ms: scan_duration_ms.map(|ms| ms.max(0) as u64),
        was_offline_verification: row.get(16)?,
        synced_at: timestamp_col(row, 17)?,
    })
}
