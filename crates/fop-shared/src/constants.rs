/// Credential format version embedded in every claim set.
pub const CREDENTIAL_VERSION: u8 = 1;

/// JOSE-style algorithm name carried in the token header.
pub const CREDENTIAL_ALG: &str = "EdDSA";

/// Token type carried in the token header.
pub const CREDENTIAL_TYP: &str = "FOP";

/// Ed25519 public key size in bytes
pub const PUBKEY_SIZE: usize = 32;

/// Ed25519 secret key size in bytes
pub const SECRET_KEY_SIZE: usize = 32;

/// Ed25519 signature size in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// Number of BLAKE3 digest bytes used for a key id (hex-encoded to 16 chars)
pub const KEY_ID_BYTES: usize = 8;

/// BLAKE3 derive-key context for key ids
pub const KDF_CONTEXT_KEY_ID: &str = "fop-credential-key-id-v1";

/// Default number of permits a device pre-fetches for offline use
pub const DEFAULT_CACHE_MAX_RESULTS: u32 = 100;

/// Default maximum number of records accepted in one sync batch
pub const DEFAULT_MAX_BATCH_SIZE: usize = 500;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Prefix for client record ids the server generates for online verifications
pub const ONLINE_RECORD_PREFIX: &str = "online-";
