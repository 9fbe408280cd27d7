//! Credential minting.
//!
//! The signer owns the only copy of the private key. Key material is handed
//! in by the caller so rotation and tests can substitute their own.

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;

use crate::cache::PublicKeyInfo;
use crate::constants::{CREDENTIAL_ALG, CREDENTIAL_VERSION};
use crate::credential::{
    encode_segment, key_id_for, CredentialClaims, CredentialHeader, PermitCredential,
    PermitSnapshot,
};
use crate::error::CredentialError;

/// Mints signed permit credentials with a single Ed25519 key.
#[derive(Clone)]
pub struct CredentialSigner {
    signing_key: SigningKey,
    key_id: String,
}

impl CredentialSigner {
    pub fn new(signing_key: SigningKey) -> Self {
        let key_id = key_id_for(&signing_key.verifying_key().to_bytes());
        Self {
            signing_key,
            key_id,
        }
    }

    /// Generate a signer with a fresh random key
    pub fn generate() -> Self {
        Self::new(SigningKey::generate(&mut OsRng))
    }

    /// Restore a signer from secret key bytes
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        Self::new(SigningKey::from_bytes(secret))
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn secret_bytes(&self) -> &[u8; 32] {
        self.signing_key.as_bytes()
    }

    /// Public half of the signing key, in the form devices provision.
    pub fn public_key(&self) -> PublicKeyInfo {
        PublicKeyInfo {
            kid: self.key_id.clone(),
            alg: CREDENTIAL_ALG.to_string(),
            public_key: hex::encode(self.verifying_key().to_bytes()),
            active: true,
        }
    }

    /// Mint a credential for `snapshot`, stamped with `issued_at`.
    pub fn mint(
        &self,
        snapshot: &PermitSnapshot,
        issued_at: DateTime<Utc>,
    ) -> Result<PermitCredential, CredentialError> {
        if snapshot.permit_id.trim().is_empty() {
            return Err(CredentialError::InvalidSnapshot(
                "permit id must not be empty".into(),
            ));
        }
        if snapshot.valid_from > snapshot.valid_until {
            return Err(CredentialError::InvalidSnapshot(format!(
                "valid_from {} is after valid_until {}",
                snapshot.valid_from, snapshot.valid_until
            )));
        }

        let claims = CredentialClaims {
            ver: CREDENTIAL_VERSION,
            kid: self.key_id.clone(),
            permit_id: snapshot.permit_id.clone(),
            permit_number: snapshot.permit_number.clone(),
            operator_name: snapshot.operator_name.clone(),
            aircraft_registration: snapshot.aircraft_registration.clone(),
            valid_from: snapshot.valid_from,
            valid_until: snapshot.valid_until,
            status: snapshot.status,
            issued_at,
        };

        let header = encode_segment(&serde_json::to_vec(&CredentialHeader::new(&self.key_id))?);
        let body = encode_segment(&serde_json::to_vec(&claims)?);
        let signing_input = format!("{header}.{body}");

        let signature = self.signing_key.sign(signing_input.as_bytes()).to_bytes();
        let token = format!("{signing_input}.{}", encode_segment(&signature));

        Ok(PermitCredential {
            claims,
            key_id: self.key_id.clone(),
            signature: signature.to_vec(),
            token,
        })
    }
}

impl std::fmt::Debug for CredentialSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialSigner")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}
