//! Permit credential claim set and its compact token encoding.
//!
//! A token is three base64url (no padding) segments joined by `.`:
//!
//! ```text
//! header . claims . signature
//! ```
//!
//! The Ed25519 signature covers the ASCII bytes `header "." claims` exactly as
//! transmitted, so a verifier never has to re-serialize anything to check it.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{
    CREDENTIAL_ALG, CREDENTIAL_TYP, KDF_CONTEXT_KEY_ID, KEY_ID_BYTES, SIGNATURE_SIZE,
};
use crate::types::PermitStatus;

/// Authoritative permit fields captured at mint time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermitSnapshot {
    pub permit_id: String,
    pub permit_number: String,
    pub operator_name: String,
    pub aircraft_registration: String,
    pub valid_from: NaiveDate,
    pub valid_until: NaiveDate,
    pub status: PermitStatus,
}

/// The signed claim set. Field order is the canonical serialization order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialClaims {
    pub ver: u8,
    pub kid: String,
    pub permit_id: String,
    pub permit_number: String,
    pub operator_name: String,
    pub aircraft_registration: String,
    pub valid_from: NaiveDate,
    pub valid_until: NaiveDate,
    pub status: PermitStatus,
    pub issued_at: DateTime<Utc>,
}

/// Token header, carried unencrypted so verifiers can pick a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialHeader {
    pub alg: String,
    pub typ: String,
    pub kid: String,
}

impl CredentialHeader {
    pub fn new(kid: &str) -> Self {
        Self {
            alg: CREDENTIAL_ALG.to_string(),
            typ: CREDENTIAL_TYP.to_string(),
            kid: kid.to_string(),
        }
    }
}

/// A minted, immutable permit credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermitCredential {
    pub claims: CredentialClaims,
    pub key_id: String,
    /// Raw 64-byte Ed25519 signature.
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
    /// Compact token, suitable for QR encoding.
    pub token: String,
}

/// A token split into its segments, before any trust decision.
#[derive(Debug, Clone)]
pub(crate) struct ParsedToken<'a> {
    pub header: CredentialHeader,
    pub signing_input: &'a str,
    pub claims_segment: &'a str,
    pub signature: [u8; SIGNATURE_SIZE],
}

/// Structural problems found while splitting a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TokenFormatError {
    SegmentCount(usize),
    Base64(&'static str),
    Header(String),
    SignatureLength(usize),
}

impl std::fmt::Display for TokenFormatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SegmentCount(n) => write!(f, "expected 3 token segments, found {n}"),
            Self::Base64(segment) => write!(f, "{segment} segment is not base64url"),
            Self::Header(e) => write!(f, "unreadable header: {e}"),
            Self::SignatureLength(n) => {
                write!(f, "signature is {n} bytes, expected {SIGNATURE_SIZE}")
            }
        }
    }
}

/// Derive the key id for a public key: hex of the first bytes of a keyed
/// BLAKE3 digest.
pub fn key_id_for(public_key: &[u8; 32]) -> String {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_KEY_ID);
    hasher.update(public_key);
    let hash = hasher.finalize();
    hex::encode(&hash.as_bytes()[..KEY_ID_BYTES])
}

pub(crate) fn encode_segment(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

pub(crate) fn decode_segment(segment: &str) -> Option<Vec<u8>> {
    URL_SAFE_NO_PAD.decode(segment).ok()
}

/// Split a token into header, signing input and signature.
pub(crate) fn parse_token(token: &str) -> Result<ParsedToken<'_>, TokenFormatError> {
    let token = token.trim();
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
        return Err(TokenFormatError::SegmentCount(parts.len()));
    }

    let header_bytes = decode_segment(parts[0]).ok_or(TokenFormatError::Base64("header"))?;
    let header: CredentialHeader = serde_json::from_slice(&header_bytes)
        .map_err(|e| TokenFormatError::Header(e.to_string()))?;

    let sig_bytes = decode_segment(parts[2]).ok_or(TokenFormatError::Base64("signature"))?;
    let signature: [u8; SIGNATURE_SIZE] = sig_bytes
        .as_slice()
        .try_into()
        .map_err(|_| TokenFormatError::SignatureLength(sig_bytes.len()))?;

    // The signing input is everything up to the second dot.
    let signing_input = &token[..parts[0].len() + 1 + parts[1].len()];

    Ok(ParsedToken {
        header,
        signing_input,
        claims_segment: parts[1],
        signature,
    })
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_id_is_stable_and_short() {
        let a = key_id_for(&[7u8; 32]);
        let b = key_id_for(&[7u8; 32]);
        assert_eq!(a, b);
        assert_eq!(a.len(), KEY_ID_BYTES * 2);
        assert_ne!(a, key_id_for(&[8u8; 32]));
    }

    #[test]
    fn test_parse_rejects_wrong_segment_count() {
        assert_eq!(
            parse_token("abc.def").unwrap_err(),
            TokenFormatError::SegmentCount(2)
        );
        assert_eq!(
            parse_token("a..c").unwrap_err(),
            TokenFormatError::SegmentCount(3)
        );
    }

    #[test]
    fn test_parse_rejects_short_signature() {
        let header = encode_segment(
            serde_json::to_vec(&CredentialHeader::new("00112233")).unwrap().as_slice(),
        );
        let token = format!("{header}.e30.{}", encode_segment(&[1, 2, 3]));
        assert_eq!(
            parse_token(&token).unwrap_err(),
            TokenFormatError::SignatureLength(3)
        );
    }

    #[test]
    fn test_parse_extracts_signing_input() {
        let header = encode_segment(
            serde_json::to_vec(&CredentialHeader::new("00112233")).unwrap().as_slice(),
        );
        let token = format!("{header}.e30.{}", encode_segment(&[0u8; SIGNATURE_SIZE]));
        let parsed = parse_token(&token).unwrap();
        assert_eq!(parsed.signing_input, format!("{header}.e30"));
        assert_eq!(parsed.claims_segment, "e30");
        assert_eq!(parsed.header.kid, "00112233");
    }
}
