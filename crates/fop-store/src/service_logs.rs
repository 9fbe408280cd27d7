use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use fop_shared::types::ServiceLogStatus;

use crate::columns::{enum_col, location_cols, timestamp_col, uuid_col};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{InsertOutcome, ServiceLog};

const COLUMNS: &str = "id, client_record_id, device_id, officer_id, officer_name, operator_id,
     permit_id, service_type, quantity, unit, fee_amount, currency, notes,
     latitude, longitude, accuracy_meters, airport, logged_at, status,
     invoice_ref, cancel_reason, synced_at, status_changed_at";

impl Database {
    /// Persist a service log unless one with the same `client_record_id` is
    /// already stored.
    pub fn insert_service_log(&self, log: &ServiceLog) -> Result<InsertOutcome> {
        if !(log.quantity.is_finite() && log.quantity > 0.0) {
            return Err(StoreError::Invalid("quantity must be positive".into()));
        }
        if log.fee_amount < 0 {
            return Err(StoreError::Invalid("fee amount must not be negative".into()));
        }

        let (latitude, longitude, accuracy) = match log.location {
            Some(loc) => (Some(loc.latitude), Some(loc.longitude), loc.accuracy_meters),
            None => (None, None, None),
        };

        let inserted = self.conn().execute(
            "INSERT INTO service_logs
                (id, client_record_id, device_id, officer_id, officer_name, operator_id,
                 permit_id, service_type, quantity, unit, fee_amount, currency, notes,
                 latitude, longitude, accuracy_meters, airport, logged_at, status,
                 invoice_ref, cancel_reason, synced_at, status_changed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                     ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)
             ON CONFLICT(client_record_id) DO NOTHING",
            params![
                log.id.to_string(),
                log.client_record_id,
                log.device_id,
                log.officer_id,
                log.officer_name,
                log.operator_id,
                log.permit_id,
                log.service_type,
                log.quantity,
                log.unit,
                log.fee_amount,
                log.currency,
                log.notes,
                latitude,
                longitude,
                accuracy,
                log.airport,
                log.logged_at.to_rfc3339(),
                log.status.as_str(),
                log.invoice_ref,
                log.cancel_reason,
                log.synced_at.to_rfc3339(),
                log.status_changed_at.to_rfc3339(),
            ],
        )?;

        if inserted == 1 {
            return Ok(InsertOutcome::Inserted(log.id));
        }

        let existing = self
            .find_service_log_id(&log.client_record_id)?
            .ok_or(StoreError::NotFound)?;
        Ok(InsertOutcome::Existing(existing))
    }

    /// Server id of an already reconciled record.
    pub fn find_service_log_id(&self, client_record_id: &str) -> Result<Option<Uuid>> {
        let id = self
            .conn()
            .query_row(
                "SELECT id FROM service_logs WHERE client_record_id = ?1",
                params![client_record_id],
                |row| uuid_col(row, 0),
            )
            .optional()?;
        Ok(id)
    }

    pub fn get_service_log(&self, id: Uuid) -> Result<Option<ServiceLog>> {
        let sql = format!("SELECT {COLUMNS} FROM service_logs WHERE id = ?1");
        let log = self
            .conn()
            .query_row(&sql, params![id.to_string()], row_to_service_log)
            .optional()?;
        Ok(log)
    }

    pub fn count_service_logs(&self, client_record_id: &str) -> Result<u32> {
        let count = self.conn().query_row(
            "SELECT COUNT(*) FROM service_logs WHERE client_record_id = ?1",
            params![client_record_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn total_service_logs(&self) -> Result<u32> {
        let count = self
            .conn()
            .query_row("SELECT COUNT(*) FROM service_logs", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Service logs for an operator in a given billing state, oldest first.
    pub fn list_service_logs(
        &self,
        operator_id: &str,
        status: ServiceLogStatus,
    ) -> Result<Vec<ServiceLog>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM service_logs
             WHERE operator_id = ?1 AND status = ?2
             ORDER BY logged_at ASC"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params![operator_id, status.as_str()], row_to_service_log)?;

        let mut logs = Vec::new();
        for row in rows {
            logs.push(row?);
        }
        Ok(logs)
    }

    /// Move `Pending` logs to `Invoiced` under one invoice reference.
    ///
    /// Runs in a single transaction: either every id moves or none does.
    pub fn mark_service_logs_invoiced(
        &mut self,
        ids: &[Uuid],
        invoice_ref: &str,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        if invoice_ref.trim().is_empty() {
            return Err(StoreError::Invalid("invoice reference must not be empty".into()));
        }

        let tx = self.conn_mut().transaction()?;
        for id in ids {
            let status: Option<ServiceLogStatus> = tx
                .query_row(
                    "SELECT status FROM service_logs WHERE id = ?1",
                    params![id.to_string()],
                    |row| enum_col(row, 0),
                )
                .optional()?;
            let status = status.ok_or(StoreError::NotFound)?;
            let next = status.transition(ServiceLogStatus::Invoiced)?;

            tx.execute(
                "UPDATE service_logs
                 SET status = ?1, invoice_ref = ?2, status_changed_at = ?3
                 WHERE id = ?4",
                params![next.as_str(), invoice_ref, now.to_rfc3339(), id.to_string()],
            )?;
        }
        tx.commit()?;

        tracing::info!(count = ids.len(), invoice_ref, "service logs invoiced");
        Ok(ids.len())
    }

    /// Cancel a log. A reason is mandatory; `Cancelled` is terminal.
    pub fn cancel_service_log(&self, id: Uuid, reason: &str, now: DateTime<Utc>) -> Result<ServiceLog> {
        if reason.trim().is_empty() {
            return Err(StoreError::Invalid("cancellation requires a reason".into()));
        }
        let log = self.get_service_log(id)?.ok_or(StoreError::NotFound)?;
        let next = log.status.transition(ServiceLogStatus::Cancelled)?;

        self.conn().execute(
            "UPDATE service_logs
             SET status = ?1, cancel_reason = ?2, status_changed_at = ?3
             WHERE id = ?4 AND status = ?5",
            params![
                next.as_str(),
                reason,
                now.to_rfc3339(),
                id.to_string(),
                log.status.as_str()
            ],
        )?;

        tracing::info!(%id, from = %log.status, reason, "service log cancelled");
        self.get_service_log(id)?.ok_or(StoreError::NotFound)
    }
}

fn row_to_service_log(row: &rusqlite::Row<'_>) -> rusqlite::Result<ServiceLog> {
    Ok(ServiceLog {
        id: uuid_col(row, 0)?,
        client_record_id: row.get(1)?,
        device_id: row.get(2)?,
        officer_id: row.get(3)?,
        officer_name: row.get(4)?,
        operator_id: row.get(5)?,
        permit_id: row.get(6)?,
        service_type: row.get(7)?,
        quantity: row.get(8)?,
        unit: row.get(9)?,
        fee_amount: row.get(10)?,
        currency: row.get(11)?,
        notes: row.get(12)?,
        location: location_cols(row, 13)?,
        airport: row.get(16)?,
        logged_at: timestamp_col(row, 17)?,
        status: enum_col(row, 18)?,
        invoice_ref: row.get(19)?,
        cancel_reason: row.get(20)?,
        synced_at: timestamp_col(row, 21)?,
        status_changed_at: timestamp_col(row, 22)?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::permits::tests::seed_operator;

    pub(crate) fn log(client_record_id: &str) -> ServiceLog {
        let now = Utc::now();
        ServiceLog {
            id: Uuid::new_v4(),
            client_record_id: client_record_id.into(),
            device_id: "dev-1".into(),
            officer_id: "off-1".into(),
            officer_name: "J. Mensah".into(),
            operator_id: "op-1".into(),
            permit_id: None,
            service_type: "Landing".into(),
            quantity: 1.0,
            unit: "landing".into(),
            fee_amount: 25_000,
            currency: "USD".into(),
            notes: None,
            location: None,
            airport: Some("DNMM".into()),
            logged_at: now,
            status: ServiceLogStatus::Pending,
            invoice_ref: None,
            cancel_reason: None,
            synced_at: now,
            status_changed_at: now,
        }
    }

    pub(crate) fn db() -> Database {
        let db = Database::open_in_memory().unwrap();
        seed_operator(&db, "op-1", "Atlantic Charter");
        db
    }

    #[test]
    fn test_resend_does_not_duplicate() {
        let db = db();
        let first = db.insert_service_log(&log("abc123")).unwrap();
        let second = db.insert_service_log(&log("abc123")).unwrap();

        assert!(matches!(first, InsertOutcome::Inserted(_)));
        assert_eq!(second, InsertOutcome::Existing(first.id()));
        assert_eq!(db.count_service_logs("abc123").unwrap(), 1);
    }

    #[test]
    fn test_non_positive_quantity_refused() {
        let db = db();
        let mut bad = log("q0");
        bad.quantity = 0.0;
        assert!(matches!(db.insert_service_log(&bad), Err(StoreError::Invalid(_))));
        bad.quantity = f64::NAN;
        assert!(db.insert_service_log(&bad).is_err());
        assert_eq!(db.total_service_logs().unwrap(), 0);
    }

    #[test]
    fn test_invoice_then_cancel() {
        let mut db = db();
        let id = db.insert_service_log(&log("inv-1")).unwrap().id();

        db.mark_service_logs_invoiced(&[id], "INV-2024-001", Utc::now()).unwrap();
        let invoiced = db.get_service_log(id).unwrap().unwrap();
        assert_eq!(invoiced.status, ServiceLogStatus::Invoiced);
        assert_eq!(invoiced.invoice_ref.as_deref(), Some("INV-2024-001"));

        // Invoiced logs cannot be invoiced again.
        assert!(matches!(
            db.mark_service_logs_invoiced(&[id], "INV-2024-002", Utc::now()),
            Err(StoreError::Transition(_))
        ));

        assert!(db.cancel_service_log(id, " ", Utc::now()).is_err());
        let cancelled = db.cancel_service_log(id, "duplicate charge", Utc::now()).unwrap();
        assert_eq!(cancelled.status, ServiceLogStatus::Cancelled);
        assert_eq!(cancelled.cancel_reason.as_deref(), Some("duplicate charge"));

        assert!(matches!(
            db.cancel_service_log(id, "again", Utc::now()),
            Err(StoreError::Transition(_))
        ));
    }

    #[test]
    fn test_invoicing_is_all_or_nothing() {
        let mut db = db();
        let a = db.insert_service_log(&log("a")).unwrap().id();
        let b = db.insert_service_log(&log("b")).unwrap().id();
        db.cancel_service_log(b, "logged in error", Utc::now()).unwrap();

        assert!(db.mark_service_logs_invoiced(&[a, b], "INV-9", Utc::now()).is_err());
        let still_pending = db.list_service_logs("op-1", ServiceLogStatus::Pending).unwrap();
        assert_eq!(still_pending.len(), 1);
        assert_eq!(still_pending[0].id, a);
    }
}
