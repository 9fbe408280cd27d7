//! Device-to-server sync contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::records::{ServiceLogRecord, VerificationRecord};
use crate::types::RecordKind;

/// One entry of a sync batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SyncRecord {
    Verification(VerificationRecord),
    ServiceLog(ServiceLogRecord),
}

impl SyncRecord {
    pub fn client_record_id(&self) -> &str {
        match self {
            Self::Verification(r) => &r.client_record_id,
            Self::ServiceLog(r) => &r.client_record_id,
        }
    }

    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Verification(_) => RecordKind::Verification,
            Self::ServiceLog(_) => RecordKind::ServiceLog,
        }
    }
}

/// A device's upload of accumulated offline records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncBatch {
    pub device_id: String,
    pub officer_id: String,
    pub records: Vec<SyncRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncStatus {
    /// Persisted by this request.
    Applied,
    /// Persisted by an earlier delivery of the same record.
    AlreadyApplied,
    /// Failed server-side validation; nothing persisted.
    Rejected,
}

impl SyncStatus {
    /// Whether the device may drop the record from its ledger.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Applied | Self::AlreadyApplied)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordOutcome {
    pub client_record_id: String,
    pub kind: RecordKind,
    pub status: SyncStatus,
    pub server_id: Option<Uuid>,
    pub reason: Option<String>,
}

impl RecordOutcome {
    pub fn applied(record: &SyncRecord, server_id: Uuid) -> Self {
        Self {
            client_record_id: record.client_record_id().to_string(),
            kind: record.kind(),
            status: SyncStatus::Applied,
            server_id: Some(server_id),
            reason: None,
        }
    }

    pub fn already_applied(record: &SyncRecord, server_id: Uuid) -> Self {
        Self {
            client_record_id: record.client_record_id().to_string(),
            kind: record.kind(),
            status: SyncStatus::AlreadyApplied,
            server_id: Some(server_id),
            reason: None,
        }
    }

    pub fn rejected(record: &SyncRecord, reason: impl Into<String>) -> Self {
        Self {
            client_record_id: record.client_record_id().to_string(),
            kind: record.kind(),
            status: SyncStatus::Rejected,
            server_id: None,
            reason: Some(reason.into()),
        }
    }
}

/// Per-record result of one batch. Never a single pass/fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub device_id: String,
    pub synced_at: DateTime<Utc>,
    pub applied: usize,
    pub already_applied: usize,
    pub rejected: usize,
    pub outcomes: Vec<RecordOutcome>,
}

impl SyncResult {
    pub fn new(device_id: &str, synced_at: DateTime<Utc>, outcomes: Vec<RecordOutcome>) -> Self {
        let count = |status| outcomes.iter().filter(|o| o.status == status).count();
        Self {
            device_id: device_id.to_string(),
            synced_at,
            applied: count(SyncStatus::Applied),
            already_applied: count(SyncStatus::AlreadyApplied),
            rejected: count(SyncStatus::Rejected),
            outcomes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_record_is_tagged_by_kind() {
        let json = serde_json::json!({
            "kind": "serviceLog",
            "clientRecordId": "abc123",
            "serviceType": "Landing",
            "quantity": 1.0,
            "unit": "landing",
            "feeAmount": 25000,
            "currency": "USD",
            "operatorId": "op-1",
            "permitId": null,
            "notes": null,
            "location": null,
            "airport": "KJFK",
            "loggedAt": "2024-06-15T10:00:00Z"
        });
        let record: SyncRecord = serde_json::from_value(json).unwrap();
        assert_eq!(record.kind(), RecordKind::ServiceLog);
        assert_eq!(record.client_record_id(), "abc123");
    }

    #[test]
    fn test_result_counts() {
        let record = SyncRecord::ServiceLog(ServiceLogRecord {
            client_record_id: "x".into(),
            service_type: "Parking".into(),
            quantity: 2.0,
            unit: "hour".into(),
            fee_amount: 100,
            currency: "USD".into(),
            operator_id: "op".into(),
            permit_id: None,
            notes: None,
            location: None,
            airport: None,
            logged_at: Utc::now(),
        });
        let outcomes = vec![
            RecordOutcome::applied(&record, Uuid::new_v4()),
            RecordOutcome::already_applied(&record, Uuid::new_v4()),
            RecordOutcome::rejected(&record, "bad"),
            RecordOutcome::rejected(&record, "worse"),
        ];
        let result = SyncResult::new("dev-1", Utc::now(), outcomes);
        assert_eq!((result.applied, result.already_applied, result.rejected), (1, 1, 2));
        assert!(SyncStatus::AlreadyApplied.is_settled());
        assert!(!SyncStatus::Rejected.is_settled());
    }
}
