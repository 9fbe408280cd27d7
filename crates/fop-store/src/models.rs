//! Domain model structs persisted in the system-of-record database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the HTTP layer.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use fop_shared::records::GeoLocation;
use fop_shared::types::{PermitStatus, ServiceLogStatus, VerificationResult};

// ---------------------------------------------------------------------------
// Reference data
// ---------------------------------------------------------------------------

/// A foreign aircraft operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operator {
    pub id: String,
    pub name: String,
    pub country: Option<String>,
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

/// Authoritative permit state, as handed over by the approval workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permit {
    pub id: String,
    pub permit_number: String,
    pub operator_id: String,
    pub aircraft_registration: String,
    pub valid_from: NaiveDate,
    pub valid_until: NaiveDate,
    pub status: PermitStatus,
    pub updated_at: DateTime<Utc>,
}

/// A permit joined with its operator's display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermitWithOperator {
    pub permit: Permit,
    pub operator_name: String,
}

/// Airport personnel allowed to scan and log services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Officer {
    pub id: String,
    pub name: String,
    pub airport: Option<String>,
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeRate {
    pub id: Uuid,
    pub service_type: String,
    pub unit: String,
    pub rate: i64,
    pub currency: String,
    pub effective_from: NaiveDate,
    pub active: bool,
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// A minted credential, kept so it can be re-served and provisioned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedCredential {
    pub id: Uuid,
    pub permit_id: String,
    pub key_id: String,
    pub token: String,
    pub valid_until: NaiveDate,
    pub issued_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Offline records
// ---------------------------------------------------------------------------

/// Result of an insert keyed by `client_record_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The row was written by this call.
    Inserted(Uuid),
    /// A row with the same `client_record_id` already existed.
    Existing(Uuid),
}

impl InsertOutcome {
    pub fn id(&self) -> Uuid {
        match self {
            Self::Inserted(id) | Self::Existing(id) => *id,
        }
    }
}

/// A reconciled verification attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationLog {
    pub id: Uuid,
    pub client_record_id: String,
    pub device_id: String,
    pub officer_id: String,
    pub officer_name: String,
    pub scanned_raw_content: String,
    pub permit_id: Option<String>,
    pub permit_number: Option<String>,
    pub result: VerificationResult,
    pub failure_reason: Option<String>,
    pub location: Option<GeoLocation>,
    pub airport: Option<String>,
    pub verified_at: DateTime<Utc>,
    pub scan_duration_ms: Option<u64>,
    pub was_offline_verification: bool,
    pub synced_at: DateTime<Utc>,
}

/// A reconciled chargeable service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceLog {
    pub id: Uuid,
    pub client_record_id: String,
    pub device_id: String,
    pub officer_id: String,
    pub officer_name: String,
    pub operator_id: String,
    pub permit_id: Option<String>,
    pub service_type: String,
    pub quantity: f64,
    pub unit: String,
    pub fee_amount: i64,
    pub currency: String,
    pub notes: Option<String>,
    pub location: Option<GeoLocation>,
    pub airport: Option<String>,
    pub logged_at: DateTime<Utc>,
    pub status: ServiceLogStatus,
    pub invoice_ref: Option<String>,
    pub cancel_reason: Option<String>,
    pub synced_at: DateTime<Utc>,
    pub status_changed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Sync bookkeeping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSession {
    pub id: Uuid,
    pub device_id: String,
    pub officer_id: String,
    pub received: u32,
    pub applied: u32,
    pub already_applied: u32,
    pub rejected: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// A stored diagnostic event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredTelemetryEvent {
    pub id: i64,
    pub device_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
}
