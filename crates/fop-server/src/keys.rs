//! Signing key loading and the verification key set.
//!
//! The server keeps one active signing key. Retired keys are public-only:
//! they are advertised on `/public-key` and kept in the key ring so
//! credentials minted before a rotation still verify until they expire.

use std::fs;
use std::path::Path;

use ed25519_dalek::VerifyingKey;
use tracing::{debug, info};

use fop_shared::cache::{PublicKeyInfo, PublicKeySet};
use fop_shared::constants::{CREDENTIAL_ALG, SECRET_KEY_SIZE};
use fop_shared::credential::key_id_for;
use fop_shared::signer::CredentialSigner;
use fop_shared::verifier::KeyRing;

use crate::config::ServerConfig;

/// Active signer plus everything devices need to verify.
pub struct KeyMaterial {
    pub signer: CredentialSigner,
    pub key_ring: KeyRing,
    pub public_keys: PublicKeySet,
}

impl KeyMaterial {
    /// Build the key material from a signer and retired public keys.
    pub fn new(signer: CredentialSigner, retired: &[[u8; 32]]) -> anyhow::Result<Self> {
        let mut key_ring = KeyRing::new().with_key(signer.verifying_key());
        let mut public_keys = PublicKeySet {
            keys: vec![signer.public_key()],
        };

        for bytes in retired {
            let key = VerifyingKey::from_bytes(bytes)
                .map_err(|_| anyhow::anyhow!("retired public key is not a valid Ed25519 point"))?;
            let kid = key_id_for(bytes);
            if kid == signer.key_id() {
                continue;
            }
            key_ring.insert(key);
            public_keys.keys.push(PublicKeyInfo {
                kid,
                alg: CREDENTIAL_ALG.to_string(),
                public_key: hex::encode(bytes),
                active: false,
            });
        }

        Ok(Self {
            signer,
            key_ring,
            public_keys,
        })
    }

    /// Load the signer named by the configuration and add retired keys.
    pub fn from_config(config: &ServerConfig) -> anyhow::Result<Self> {
        let signer = match config.signing_key {
            Some(secret) => {
                info!("Using signing key from SIGNING_KEY");
                CredentialSigner::from_secret_bytes(&secret)
            }
            None => load_or_generate_signer(&config.signing_key_path)?,
        };
        info!(
            kid = signer.key_id(),
            retired = config.retired_public_keys.len(),
            "Credential signing key ready"
        );
        Self::new(signer, &config.retired_public_keys)
    }
}

/// Load the 32-byte signing secret at `path`, or generate and save one.
pub fn load_or_generate_signer(path: &Path) -> anyhow::Result<CredentialSigner> {
    if path.exists() {
        debug!(path = %path.display(), "Loading signing key");
        let bytes = fs::read(path)?;
        let secret: [u8; SECRET_KEY_SIZE] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("signing key file must hold exactly 32 bytes"))?;
        Ok(CredentialSigner::from_secret_bytes(&secret))
    } else {
        info!(path = %path.display(), "Generating new signing key");
        let signer = CredentialSigner::generate();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, signer.secret_bytes())?;
        restrict_permissions(path)?;
        Ok(signer)
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
