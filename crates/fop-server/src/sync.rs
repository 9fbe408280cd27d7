//! Reconciliation of offline record batches.
//!
//! Each record is deduplicated by its `client_record_id`, validated and
//! persisted on its own. One bad record never rolls back the others, and a
//! batch delivered twice leaves the database exactly as one delivery would.
//!
//! The database lock is taken per record, not per batch, so concurrent
//! uploads interleave at record granularity. Uniqueness is enforced by the
//! store's `ON CONFLICT DO NOTHING` insert, not by the pre-check here.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use fop_shared::records::{ServiceLogRecord, VerificationRecord};
use fop_shared::sync::{RecordOutcome, SyncBatch, SyncRecord, SyncResult};
use fop_shared::types::ServiceLogStatus;
use fop_store::{Database, InsertOutcome, Officer, ServiceLog, SyncSession, VerificationLog};

use crate::api::SharedDatabase;
use crate::error::ServerError;

/// Applies [`SyncBatch`]es against the system-of-record store.
#[derive(Clone)]
pub struct Reconciler {
    db: SharedDatabase,
    max_batch_size: usize,
}

/// Identity every record of a batch is attributed to.
struct BatchContext<'a> {
    device_id: &'a str,
    officer: &'a Officer,
    now: DateTime<Utc>,
}

/// Result of validating one record before it is written.
enum Validated<T> {
    Accept(T),
    Reject(String),
}

impl Reconciler {
    pub fn new(db: SharedDatabase, max_batch_size: usize) -> Self {
        Self { db, max_batch_size }
    }

    /// Reconcile one batch.
    ///
    /// Envelope problems fail the whole request; record problems are
    /// reported per record. A storage failure aborts the request, leaving
    /// already-applied records in place for the device's retry to find.
    pub async fn reconcile(
        &self,
        batch: &SyncBatch,
        now: DateTime<Utc>,
    ) -> Result<SyncResult, ServerError> {
        self.check_envelope(batch)?;

        // 1. Officer identity, once per batch.
        let officer = {
            let db = self.db.lock().await;
            db.get_officer(&batch.officer_id)?
        };

        let outcomes = match officer {
            Some(officer) if officer.active => {
                let ctx = BatchContext {
                    device_id: &batch.device_id,
                    officer: &officer,
                    now,
                };
                let mut outcomes = Vec::with_capacity(batch.records.len());
                for record in &batch.records {
                    let db = self.db.lock().await;
                    outcomes.push(apply_record(&db, &ctx, record)?);
                }
                outcomes
            }
            found => {
                let reason = match found {
                    Some(_) => format!("officer {} is inactive", batch.officer_id),
                    None => format!("unknown officer {}", batch.officer_id),
                };
                warn!(
                    device = %batch.device_id,
                    officer = %batch.officer_id,
                    records = batch.records.len(),
                    "Rejecting batch records: {reason}"
                );
                batch
                    .records
                    .iter()
                    .map(|record| RecordOutcome::rejected(record, reason.clone()))
                    .collect()
            }
        };

        let result = SyncResult::new(&batch.device_id, now, outcomes);

        {
            let db = self.db.lock().await;
            db.insert_sync_session(&SyncSession {
                id: Uuid::new_v4(),
                device_id: batch.device_id.clone(),
                officer_id: batch.officer_id.clone(),
                received: batch.records.len() as u32,
                applied: result.applied as u32,
                already_applied: result.already_applied as u32,
                rejected: result.rejected as u32,
                started_at: now,
                completed_at: Utc::now(),
            })?;
        }

        info!(
            device = %batch.device_id,
            officer = %batch.officer_id,
            received = batch.records.len(),
            applied = result.applied,
            already_applied = result.already_applied,
            rejected = result.rejected,
            "Sync batch reconciled"
        );

        Ok(result)
    }

    fn check_envelope(&self, batch: &SyncBatch) -> Result<(), ServerError> {
        if batch.device_id.trim().is_empty() {
            return Err(ServerError::BadRequest("deviceId is required".into()));
        }
        if batch.officer_id.trim().is_empty() {
            return Err(ServerError::BadRequest("officerId is required".into()));
        }
        if batch.records.is_empty() {
            return Err(ServerError::BadRequest("batch contains no records".into()));
        }
        if batch.records.len() > self.max_batch_size {
            return Err(ServerError::BadRequest(format!(
                "batch has {} records, limit is {}",
                batch.records.len(),
                self.max_batch_size
            )));
        }
        Ok(())
    }
}

fn apply_record(
    db: &Database,
    ctx: &BatchContext<'_>,
    record: &SyncRecord,
) -> Result<RecordOutcome, ServerError> {
    if record.client_record_id().trim().is_empty() {
        return Ok(RecordOutcome::rejected(record, "clientRecordId is required"));
    }

    // 2/3. A record seen before reports its earlier outcome, whatever the
    // server's reference data looks like now. The id is unique across both
    // kinds, so a reuse under the other kind is refused, not applied.
    match db.find_client_record(record.client_record_id())? {
        Some((kind, server_id)) if kind == record.kind() => {
            debug!(client_record_id = record.client_record_id(), "Record already applied");
            return Ok(RecordOutcome::already_applied(record, server_id));
        }
        Some((kind, _)) => {
            return Ok(reject(
                record,
                format!("clientRecordId already used by a {kind} record"),
            ));
        }
        None => {}
    }

    let inserted = match record {
        SyncRecord::Verification(r) => match validate_verification(db, ctx, r)? {
            Validated::Accept(log) => db.insert_verification_log(&log)?,
            Validated::Reject(reason) => return Ok(reject(record, reason)),
        },
        SyncRecord::ServiceLog(r) => match validate_service_log(db, ctx, r)? {
            Validated::Accept(log) => db.insert_service_log(&log)?,
            Validated::Reject(reason) => return Ok(reject(record, reason)),
        },
    };

    Ok(match inserted {
        InsertOutcome::Inserted(id) => {
            debug!(client_record_id = record.client_record_id(), %id, "Record applied");
            RecordOutcome::applied(record, id)
        }
        // Lost a race with a concurrent delivery of the same record.
        InsertOutcome::Existing(id) => RecordOutcome::already_applied(record, id),
    })
}

fn reject(record: &SyncRecord, reason: String) -> RecordOutcome {
    warn!(
        client_record_id = record.client_record_id(),
        kind = %record.kind(),
        reason = %reason,
        "Record rejected"
    );
    RecordOutcome::rejected(record, reason)
}

/// Permit resolution is best-effort: a verification record documents what
/// the officer observed, including scans that resolved to nothing. Only a
/// record that claims a concrete permit the server has never heard of is
/// refused.
fn validate_verification(
    db: &Database,
    ctx: &BatchContext<'_>,
    record: &VerificationRecord,
) -> Result<Validated<VerificationLog>, ServerError> {
    if record.scanned_raw_content.is_empty() {
        return Ok(Validated::Reject("scannedRawContent is required".into()));
    }
    if record
        .scan_duration_ms
        .is_some_and(|ms| i64::try_from(ms).is_err())
    {
        return Ok(Validated::Reject("scanDurationMs is out of range".into()));
    }

    let resolved = record.result.implies_resolved_permit();
    let permit_id = match (&record.permit_id, &record.permit_number) {
        (Some(id), _) => {
            if resolved && !db.permit_exists(id)? {
                return Ok(Validated::Reject(format!(
                    "unresolvable permit reference {id}"
                )));
            }
            Some(id.clone())
        }
        (None, Some(number)) => {
            let found = db.find_permit_id_by_number(number)?;
            if resolved && found.is_none() {
                return Ok(Validated::Reject(format!(
                    "unresolvable permit reference {number}"
                )));
            }
            found
        }
        (None, None) => None,
    };

    Ok(Validated::Accept(VerificationLog {
        id: Uuid::new_v4(),
        client_record_id: record.client_record_id.clone(),
        device_id: ctx.device_id.to_string(),
        officer_id: ctx.officer.id.clone(),
        officer_name: ctx.officer.name.clone(),
        scanned_raw_content: record.scanned_raw_content.clone(),
        permit_id,
        permit_number: record.permit_number.clone(),
        result: record.result,
        failure_reason: record.failure_reason.clone(),
        location: record.location,
        airport: record.airport.clone(),
        verified_at: record.verified_at,
        scan_duration_ms: record.scan_duration_ms,
        was_offline_verification: true,
        synced_at: ctx.now,
    }))
}

/// The fee is taken as the officer logged it; financial reconciliation
/// happens downstream.
fn validate_service_log(
    db: &Database,
    ctx: &BatchContext<'_>,
    record: &ServiceLogRecord,
) -> Result<Validated<ServiceLog>, ServerError> {
    if record.service_type.trim().is_empty() {
        return Ok(Validated::Reject("serviceType is required".into()));
    }
    if record.unit.trim().is_empty() || record.currency.trim().is_empty() {
        return Ok(Validated::Reject("unit and currency are required".into()));
    }
    if !(record.quantity.is_finite() && record.quantity > 0.0) {
        return Ok(Validated::Reject(format!(
            "quantity must be greater than zero, got {}",
            record.quantity
        )));
    }
    if record.fee_amount < 0 {
        return Ok(Validated::Reject("feeAmount must not be negative".into()));
    }
    if db.get_operator(&record.operator_id)?.is_none() {
        return Ok(Validated::Reject(format!(
            "unknown operator {}",
            record.operator_id
        )));
    }
    if let Some(permit_id) = &record.permit_id {
        if !db.permit_exists(permit_id)? {
            return Ok(Validated::Reject(format!(
                "unresolvable permit reference {permit_id}"
            )));
        }
    }

    Ok(Validated::Accept(ServiceLog {
        id: Uuid::new_v4(),
        client_record_id: record.client_record_id.clone(),
        device_id: ctx.device_id.to_string(),
        officer_id: ctx.officer.id.clone(),
        officer_name: ctx.officer.name.clone(),
        operator_id: record.operator_id.clone(),
        permit_id: record.permit_id.clone(),
        service_type: record.service_type.clone(),
        quantity: record.quantity,
        unit: record.unit.clone(),
        fee_amount: record.fee_amount,
        currency: record.currency.clone(),
        notes: record.notes.clone(),
        location: record.location,
        airport: record.airport.clone(),
        logged_at: record.logged_at,
        status: ServiceLogStatus::Pending,
        invoice_ref: None,
        cancel_reason: None,
        synced_at: ctx.now,
        status_changed_at: ctx.now,
    }))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::NaiveDate;
    use fop_shared::sync::SyncStatus;
    use fop_shared::types::{PermitStatus, VerificationResult};
    use fop_store::{Operator, Permit};
    use tokio::sync::Mutex;

    pub(crate) fn seeded_db() -> SharedDatabase {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        db.upsert_operator(&Operator {
            id: "op-1".into(),
            name: "Atlantic Charter".into(),
            country: Some("GB".into()),
            active: true,
            updated_at: now,
        })
        .unwrap();
        db.upsert_permit(&Permit {
            id: "p-1".into(),
            permit_number: "FOP-2024-0001".into(),
            operator_id: "op-1".into(),
            aircraft_registration: "G-ABCD".into(),
            valid_from: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            valid_until: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
            status: PermitStatus::Active,
            updated_at: now,
        })
        .unwrap();
        db.upsert_officer(&Officer {
            id: "off-1".into(),
            name: "J. Mensah".into(),
            airport: Some("DNMM".into()),
            active: true,
            updated_at: now,
        })
        .unwrap();
        db.upsert_officer(&Officer {
            id: "off-retired".into(),
            name: "A. Okafor".into(),
            airport: None,
            active: false,
            updated_at: now,
        })
        .unwrap();
        Arc::new(Mutex::new(db))
    }

    pub(crate) fn verification(id: &str, permit_id: Option<&str>) -> SyncRecord {
        SyncRecord::Verification(VerificationRecord {
            client_record_id: id.into(),
            scanned_raw_content: "eyJ...".into(),
            permit_id: permit_id.map(String::from),
            permit_number: None,
            result: VerificationResult::Valid,
            failure_reason: None,
            location: None,
            airport: Some("DNMM".into()),
            verified_at: Utc::now(),
            scan_duration_ms: Some(300),
            was_offline_verification: true,
        })
    }

    pub(crate) fn service_log(id: &str, operator_id: &str, quantity: f64) -> SyncRecord {
        SyncRecord::ServiceLog(ServiceLogRecord {
            client_record_id: id.into(),
            service_type: "Landing".into(),
            quantity,
            unit: "landing".into(),
            fee_amount: 25_000,
            currency: "USD".into(),
            operator_id: operator_id.into(),
            permit_id: Some("p-1".into()),
            notes: None,
            location: None,
            airport: Some("DNMM".into()),
            logged_at: Utc::now(),
        })
    }

    fn batch(officer_id: &str, records: Vec<SyncRecord>) -> SyncBatch {
        SyncBatch {
            device_id: "dev-1".into(),
            officer_id: officer_id.into(),
            records,
        }
    }

    #[tokio::test]
    async fn test_resent_batch_is_a_no_op() {
        let db = seeded_db();
        let reconciler = Reconciler::new(db.clone(), 500);
        let batch = batch("off-1", vec![service_log("abc123", "op-1", 1.0)]);

        let first = reconciler.reconcile(&batch, Utc::now()).await.unwrap();
        assert_eq!(first.applied, 1);
        let second = reconciler.reconcile(&batch, Utc::now()).await.unwrap();
        assert_eq!(second.applied, 0);
        assert_eq!(second.already_applied, 1);
        assert_eq!(first.outcomes[0].server_id, second.outcomes[0].server_id);

        let db = db.lock().await;
        assert_eq!(db.count_service_logs("abc123").unwrap(), 1);
        assert_eq!(db.total_service_logs().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_partial_failure_is_isolated() {
        let db = seeded_db();
        let reconciler = Reconciler::new(db.clone(), 500);
        let records = vec![
            verification("v1", Some("p-1")),
            verification("v2", Some("p-1")),
            verification("v3", Some("no-such-permit")),
            verification("v4", Some("p-1")),
            verification("v5", None),
        ];

        let result = reconciler
            .reconcile(&batch("off-1", records), Utc::now())
            .await
            .unwrap();
        assert_eq!(result.applied, 4);
        assert_eq!(result.rejected, 1);
        assert_eq!(result.outcomes[2].client_record_id, "v3");
        assert_eq!(result.outcomes[2].status, SyncStatus::Rejected);
        assert!(result.outcomes[2].reason.as_deref().unwrap().contains("no-such-permit"));
        assert_eq!(db.lock().await.total_verification_logs().unwrap(), 4);
    }

    #[tokio::test]
    async fn test_not_found_scans_are_kept() {
        let db = seeded_db();
        let reconciler = Reconciler::new(db.clone(), 500);
        let mut record = verification("nf-1", Some("no-such-permit"));
        if let SyncRecord::Verification(r) = &mut record {
            r.result = VerificationResult::NotFound;
        }

        let result = reconciler
            .reconcile(&batch("off-1", vec![record]), Utc::now())
            .await
            .unwrap();
        assert_eq!(result.applied, 1);

        let stored = db
            .lock()
            .await
            .get_verification_log_by_client_id("nf-1")
            .unwrap()
            .unwrap();
        assert_eq!(stored.result, VerificationResult::NotFound);
        assert!(stored.was_offline_verification);
        assert_eq!(stored.officer_name, "J. Mensah");
    }

    #[tokio::test]
    async fn test_permit_number_is_resolved() {
        let db = seeded_db();
        let reconciler = Reconciler::new(db.clone(), 500);
        let mut record = verification("num-1", None);
        if let SyncRecord::Verification(r) = &mut record {
            r.permit_number = Some("FOP-2024-0001".into());
        }

        reconciler
            .reconcile(&batch("off-1", vec![record]), Utc::now())
            .await
            .unwrap();
        let stored = db
            .lock()
            .await
            .get_verification_log_by_client_id("num-1")
            .unwrap()
            .unwrap();
        assert_eq!(stored.permit_id.as_deref(), Some("p-1"));
    }

    #[tokio::test]
    async fn test_unknown_permit_number_follows_result() {
        let db = seeded_db();
        let reconciler = Reconciler::new(db.clone(), 500);
        let by_number = |id: &str, result: VerificationResult| {
            let mut record = verification(id, None);
            if let SyncRecord::Verification(r) = &mut record {
                r.permit_number = Some("FOP-9999-0000".into());
                r.result = result;
            }
            record
        };
        let records = vec![
            by_number("claims-valid", VerificationResult::Valid),
            by_number("claims-revoked", VerificationResult::Revoked),
            by_number("saw-nothing", VerificationResult::NotFound),
        ];

        let result = reconciler
            .reconcile(&batch("off-1", records), Utc::now())
            .await
            .unwrap();
        let statuses: Vec<_> = result.outcomes.iter().map(|o| o.status).collect();
        assert_eq!(
            statuses,
            vec![SyncStatus::Rejected, SyncStatus::Rejected, SyncStatus::Applied]
        );
        assert!(result.outcomes[0].reason.as_deref().unwrap().contains("FOP-9999-0000"));
    }

    #[tokio::test]
    async fn test_oversized_scan_duration_is_rejected() {
        let db = seeded_db();
        let reconciler = Reconciler::new(db.clone(), 500);
        let mut record = verification("slow", Some("p-1"));
        if let SyncRecord::Verification(r) = &mut record {
            r.scan_duration_ms = Some(u64::MAX);
        }
        let records = vec![record, verification("fine", Some("p-1"))];

        let result = reconciler
            .reconcile(&batch("off-1", records), Utc::now())
            .await
            .unwrap();
        assert_eq!(result.outcomes[0].status, SyncStatus::Rejected);
        assert_eq!(result.outcomes[1].status, SyncStatus::Applied);
        assert_eq!(db.lock().await.total_verification_logs().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_client_record_id_reused_across_kinds() {
        let db = seeded_db();
        let reconciler = Reconciler::new(db.clone(), 500);
        let records = vec![verification("dup-1", Some("p-1")), service_log("dup-1", "op-1", 1.0)];

        let result = reconciler
            .reconcile(&batch("off-1", records.clone()), Utc::now())
            .await
            .unwrap();
        assert_eq!(result.applied, 1);
        assert_eq!(result.rejected, 1);
        assert_eq!(result.outcomes[1].status, SyncStatus::Rejected);
        assert!(result.outcomes[1].reason.as_deref().unwrap().contains("verification"));

        // Resending keeps the first kind's outcome.
        let again = reconciler
            .reconcile(&batch("off-1", records), Utc::now())
            .await
            .unwrap();
        assert_eq!(again.outcomes[0].status, SyncStatus::AlreadyApplied);
        assert_eq!(again.outcomes[0].server_id, result.outcomes[0].server_id);

        let db = db.lock().await;
        assert_eq!(db.total_verification_logs().unwrap(), 1);
        assert_eq!(db.total_service_logs().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_service_log_validation() {
        let db = seeded_db();
        let reconciler = Reconciler::new(db.clone(), 500);
        let records = vec![
            service_log("ok", "op-1", 2.5),
            service_log("zero", "op-1", 0.0),
            service_log("ghost", "op-404", 1.0),
        ];

        let result = reconciler
            .reconcile(&batch("off-1", records), Utc::now())
            .await
            .unwrap();
        let statuses: Vec<_> = result.outcomes.iter().map(|o| o.status).collect();
        assert_eq!(
            statuses,
            vec![SyncStatus::Applied, SyncStatus::Rejected, SyncStatus::Rejected]
        );

        let db = db.lock().await;
        let pending = db.list_service_logs("op-1", ServiceLogStatus::Pending).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].quantity, 2.5);
    }

    #[tokio::test]
    async fn test_unknown_officer_rejects_every_record() {
        let db = seeded_db();
        let reconciler = Reconciler::new(db.clone(), 500);
        let records = vec![verification("a", Some("p-1")), service_log("b", "op-1", 1.0)];

        for officer in ["nobody", "off-retired"] {
            let result = reconciler
                .reconcile(&batch(officer, records.clone()), Utc::now())
                .await
                .unwrap();
            assert_eq!(result.rejected, 2);
        }
        assert_eq!(db.lock().await.total_verification_logs().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_within_one_batch() {
        let db = seeded_db();
        let reconciler = Reconciler::new(db, 500);
        let records = vec![verification("same", Some("p-1")), verification("same", Some("p-1"))];

        let result = reconciler
            .reconcile(&batch("off-1", records), Utc::now())
            .await
            .unwrap();
        assert_eq!(result.applied, 1);
        assert_eq!(result.already_applied, 1);
    }

    #[tokio::test]
    async fn test_bad_envelope_fails_whole_batch() {
        let reconciler = Reconciler::new(seeded_db(), 2);

        let empty = batch("off-1", vec![]);
        assert!(matches!(
            reconciler.reconcile(&empty, Utc::now()).await,
            Err(ServerError::BadRequest(_))
        ));

        let mut no_device = batch("off-1", vec![verification("x", None)]);
        no_device.device_id = " ".into();
        assert!(reconciler.reconcile(&no_device, Utc::now()).await.is_err());

        let oversize = batch(
            "off-1",
            vec![verification("1", None), verification("2", None), verification("3", None)],
        );
        assert!(reconciler.reconcile(&oversize, Utc::now()).await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_overlapping_batches() {
        let db = seeded_db();
        let reconciler = Reconciler::new(db.clone(), 500);
        let records: Vec<_> = (0..20)
            .map(|i| service_log(&format!("rec-{i}"), "op-1", 1.0))
            .collect();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let reconciler = reconciler.clone();
            let batch = batch("off-1", records.clone());
            handles.push(tokio::spawn(async move {
                reconciler.reconcile(&batch, Utc::now()).await.unwrap()
            }));
        }

        let mut applied = 0;
        for handle in handles {
            applied += handle.await.unwrap().applied;
        }
        assert_eq!(applied, 20);
        assert_eq!(db.lock().await.total_service_logs().unwrap(), 20);
    }

    #[tokio::test]
    async fn test_sync_session_recorded() {
        let db = seeded_db();
        let reconciler = Reconciler::new(db.clone(), 500);
        reconciler
            .reconcile(
                &batch("off-1", vec![verification("s1", Some("p-1")), service_log("s2", "op-404", 1.0)]),
                Utc::now(),
            )
            .await
            .unwrap();

        let sessions = db.lock().await.recent_sync_sessions("dev-1", 5).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!((sessions[0].received, sessions[0].applied, sessions[0].rejected), (2, 1, 1));
    }
}
