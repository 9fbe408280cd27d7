//! Records a field device captures while offline.
//!
//! Every record carries a `client_record_id` generated on the device. It is
//! the only deduplication key the server uses: a device must generate exactly
//! one id per logical action and resend that same id on every retry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::VerificationResult;

/// Device position when a record was captured.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_meters: Option<f64>,
}

/// One attempt to validate a scanned credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRecord {
    pub client_record_id: String,
    pub scanned_raw_content: String,
    pub permit_id: Option<String>,
    pub permit_number: Option<String>,
    pub result: VerificationResult,
    pub failure_reason: Option<String>,
    pub location: Option<GeoLocation>,
    pub airport: Option<String>,
    pub verified_at: DateTime<Utc>,
    pub scan_duration_ms: Option<u64>,
    #[serde(default = "default_offline")]
    pub was_offline_verification: bool,
}

fn default_offline() -> bool {
    true
}

/// One chargeable airport service logged by an officer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceLogRecord {
    pub client_record_id: String,
    pub service_type: String,
    pub quantity: f64,
    pub unit: String,
    /// Fee in minor currency units, as quoted to the operator at log time.
    pub fee_amount: i64,
    pub currency: String,
    pub operator_id: String,
    pub permit_id: Option<String>,
    pub notes: Option<String>,
    pub location: Option<GeoLocation>,
    pub airport: Option<String>,
    pub logged_at: DateTime<Utc>,
}

/// Generate a fresh client record id.
pub fn new_client_record_id() -> String {
    Uuid::new_v4().to_string()
}
