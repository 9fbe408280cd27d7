//! Credential verification.
//!
//! [`verify`] is a pure function of the token, the clock reading, the known
//! public keys and an optional permit lookup. The server runs it with its
//! database as the lookup; a disconnected device runs it with its provisioned
//! cache or with no lookup at all.
//!
//! Checks short-circuit in this order: structure, signature, validity window,
//! embedded status, live lookup. Every outcome is a value, never an error:
//! an invalid permit is an expected result of scanning.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::cache::{PublicKeyInfo, PublicKeySet};
use crate::constants::CREDENTIAL_VERSION;
use crate::credential::{decode_segment, key_id_for, parse_token, CredentialClaims};
use crate::error::CredentialError;
use crate::types::{PermitStatus, VerificationResult};

// ---------------------------------------------------------------------------
// Key ring
// ---------------------------------------------------------------------------

/// Public keys indexed by key id. Holds every key a credential in circulation
/// may have been signed with, including retired ones.
#[derive(Debug, Clone, Default)]
pub struct KeyRing {
    keys: HashMap<String, VerifyingKey>,
}

impl KeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key; returns its key id.
    pub fn insert(&mut self, key: VerifyingKey) -> String {
        let kid = key_id_for(&key.to_bytes());
        self.keys.insert(kid.clone(), key);
        kid
    }

    pub fn with_key(mut self, key: VerifyingKey) -> Self {
        self.insert(key);
        self
    }

    /// Add a key from its distributed form. The key id is recomputed and must
    /// match the advertised one.
    pub fn insert_info(&mut self, info: &PublicKeyInfo) -> Result<String, CredentialError> {
        let bytes = hex::decode(info.public_key.trim())?;
        let bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| CredentialError::InvalidKeyBytes)?;
        let key = VerifyingKey::from_bytes(&bytes).map_err(|_| CredentialError::InvalidKeyBytes)?;
        if key_id_for(&bytes) != info.kid {
            return Err(CredentialError::InvalidKeyBytes);
        }
        Ok(self.insert(key))
    }

    pub fn from_key_set(set: &PublicKeySet) -> Result<Self, CredentialError> {
        let mut ring = Self::new();
        for info in &set.keys {
            ring.insert_info(info)?;
        }
        Ok(ring)
    }

    pub fn get(&self, kid: &str) -> Option<&VerifyingKey> {
        self.keys.get(kid)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Live lookup
// ---------------------------------------------------------------------------

/// Current truth about a permit, as known to the lookup source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermitState {
    pub status: PermitStatus,
    pub valid_until: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermitLookupResult {
    Found(PermitState),
    /// The source is authoritative and has no such permit.
    NotFound,
    /// The source has no information; embedded claims stand.
    Unknown,
}

/// Source of fresher permit state than the credential carries.
pub trait PermitLookup {
    fn lookup_permit(&self, permit_id: &str) -> PermitLookupResult;
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Display fields of a credential that passed every check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedClaims {
    pub permit_id: String,
    pub permit_number: String,
    pub operator_name: String,
    pub aircraft_registration: String,
    pub valid_from: NaiveDate,
    pub valid_until: NaiveDate,
    pub status: PermitStatus,
    pub issued_at: DateTime<Utc>,
    pub kid: String,
    pub days_until_expiry: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationOutcome {
    pub is_valid: bool,
    pub result: VerificationResult,
    /// Present on success, and on `Expired`/`Revoked` so the officer can see
    /// which permit was scanned.
    pub claims: Option<VerifiedClaims>,
    pub failure_reason: Option<String>,
    /// Whether a lookup source supplied current permit state.
    pub live_checked: bool,
}

impl VerificationOutcome {
    fn failed(result: VerificationResult, reason: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            result,
            claims: None,
            failure_reason: Some(reason.into()),
            live_checked: false,
        }
    }

    fn rejected_claims(
        result: VerificationResult,
        claims: VerifiedClaims,
        reason: String,
        live_checked: bool,
    ) -> Self {
        Self {
            is_valid: false,
            result,
            claims: Some(claims),
            failure_reason: Some(reason),
            live_checked,
        }
    }

    /// Permit id the scan resolved to, if any.
    pub fn permit_id(&self) -> Option<&str> {
        self.claims.as_ref().map(|c| c.permit_id.as_str())
    }

    pub fn permit_number(&self) -> Option<&str> {
        self.claims.as_ref().map(|c| c.permit_number.as_str())
    }
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

/// Verify a credential token at `now`.
pub fn verify(
    token: &str,
    now: DateTime<Utc>,
    keys: &KeyRing,
    lookup: Option<&dyn PermitLookup>,
) -> VerificationOutcome {
    // 1. Structure.
    let parsed = match parse_token(token) {
        Ok(parsed) => parsed,
        Err(e) => return VerificationOutcome::failed(VerificationResult::Malformed, e.to_string()),
    };

    // 2. Signature, against the key the header names.
    let Some(key) = keys.get(&parsed.header.kid) else {
        return VerificationOutcome::failed(
            VerificationResult::SignatureInvalid,
            format!("unknown signing key {}", parsed.header.kid),
        );
    };
    let signature = Signature::from_bytes(&parsed.signature);
    if key
        .verify(parsed.signing_input.as_bytes(), &signature)
        .is_err()
    {
        return VerificationOutcome::failed(
            VerificationResult::SignatureInvalid,
            "signature does not match credential contents",
        );
    }

    let claims: CredentialClaims = match decode_segment(parsed.claims_segment)
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
    {
        Some(claims) => claims,
        None => {
            return VerificationOutcome::failed(
                VerificationResult::Malformed,
                "signed claims are unreadable",
            )
        }
    };
    if claims.ver != CREDENTIAL_VERSION || claims.kid != parsed.header.kid {
        return VerificationOutcome::failed(
            VerificationResult::Malformed,
            format!("unsupported credential version {} or key id mismatch", claims.ver),
        );
    }

    let today = now.date_naive();
    let mut display = VerifiedClaims {
        permit_id: claims.permit_id,
        permit_number: claims.permit_number,
        operator_name: claims.operator_name,
        aircraft_registration: claims.aircraft_registration,
        valid_from: claims.valid_from,
        valid_until: claims.valid_until,
        status: claims.status,
        issued_at: claims.issued_at,
        kid: claims.kid,
        days_until_expiry: (claims.valid_until - today).num_days(),
    };

    // 3. Validity window, inclusive at both ends.
    if today < display.valid_from {
        let reason = format!("credential not valid before {}", display.valid_from);
        return VerificationOutcome::rejected_claims(
            VerificationResult::Expired,
            display,
            reason,
            false,
        );
    }
    if today > display.valid_until {
        let reason = format!("credential expired on {}", display.valid_until);
        return VerificationOutcome::rejected_claims(
            VerificationResult::Expired,
            display,
            reason,
            false,
        );
    }

    // 4. Status at mint time.
    if !display.status.is_active() {
        let reason = format!("permit status is {}", display.status);
        return VerificationOutcome::rejected_claims(
            VerificationResult::Revoked,
            display,
            reason,
            false,
        );
    }

    // 5. Live state overrides the embedded snapshot.
    let mut live_checked = false;
    if let Some(lookup) = lookup {
        match lookup.lookup_permit(&display.permit_id) {
            PermitLookupResult::Found(state) => {
                live_checked = true;
                display.status = state.status;
                display.valid_until = state.valid_until;
                display.days_until_expiry = (state.valid_until - today).num_days();

                if today > state.valid_until {
                    let reason = format!("permit expired on {}", state.valid_until);
                    return VerificationOutcome::rejected_claims(
                        VerificationResult::Expired,
                        display,
                        reason,
                        true,
                    );
                }
                if !state.status.is_active() {
                    let reason = format!("permit status is now {}", state.status);
                    return VerificationOutcome::rejected_claims(
                        VerificationResult::Revoked,
                        display,
                        reason,
                        true,
                    );
                }
            }
            PermitLookupResult::NotFound => {
                let mut outcome = VerificationOutcome::failed(
                    VerificationResult::NotFound,
                    format!("permit {} is not on record", display.permit_id),
                );
                outcome.live_checked = true;
                return outcome;
            }
            PermitLookupResult::Unknown => {}
        }
    }

    VerificationOutcome {
        is_valid: true,
        result: VerificationResult::Valid,
        claims: Some(display),
        failure_reason: None,
        live_checked,
    }
}
