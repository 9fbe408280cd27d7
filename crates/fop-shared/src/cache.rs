//! Read-only projections a field device pre-fetches for offline work.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::types::PermitStatus;

/// One verification key as distributed to devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyInfo {
    pub kid: String,
    pub alg: String,
    /// Hex-encoded 32-byte Ed25519 public key.
    pub public_key: String,
    /// `false` for retired keys that still verify older credentials.
    pub active: bool,
}

/// Response body of `GET /public-key`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeySet {
    pub keys: Vec<PublicKeyInfo>,
}

/// A permit a device is likely to scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedPermitSummary {
    pub permit_id: String,
    pub permit_number: String,
    pub operator_id: String,
    pub operator_name: String,
    pub aircraft_registration: String,
    pub valid_from: NaiveDate,
    pub valid_until: NaiveDate,
    pub status: PermitStatus,
    /// Latest issued credential token, when one exists.
    pub credential_token: Option<String>,
}

/// Current rate for a chargeable service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedFeeRate {
    pub service_type: String,
    pub unit: String,
    /// Price per unit in minor currency units.
    pub rate: i64,
    pub currency: String,
    pub effective_from: NaiveDate,
}

/// Response body of `GET /cache/permits`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedPermits {
    pub provisioned_at: DateTime<Utc>,
    pub permits: Vec<CachedPermitSummary>,
}

/// Response body of `GET /cache/fee-rates`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedFeeRates {
    pub provisioned_at: DateTime<Utc>,
    pub fee_rates: Vec<CachedFeeRate>,
}
