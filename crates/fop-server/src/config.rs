//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use fop_shared::constants::{DEFAULT_HTTP_PORT, DEFAULT_MAX_BATCH_SIZE};

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./data/fop.db`
    pub database_path: PathBuf,

    /// File holding the 32-byte Ed25519 signing secret. Generated on first
    /// start when missing.
    /// Env: `SIGNING_KEY_PATH`
    /// Default: `./data/signing.key`
    pub signing_key_path: PathBuf,

    /// Signing secret given inline (hex-encoded, 64 chars). Takes precedence
    /// over `signing_key_path`.
    /// Env: `SIGNING_KEY`
    pub signing_key: Option<[u8; 32]>,

    /// Public keys of retired signing keys that must still verify
    /// credentials in circulation (comma-separated hex).
    /// Env: `RETIRED_PUBLIC_KEYS`
    pub retired_public_keys: Vec<[u8; 32]>,

    /// Admin API bearer token. Required to access /admin/* endpoints.
    /// Env: `ADMIN_TOKEN`
    /// Default: empty (admin API disabled).
    pub admin_token: Option<String>,

    /// Maximum number of records in one sync batch.
    /// Env: `MAX_BATCH_SIZE`
    pub max_batch_size: usize,

    /// Upper bound for `maxResults` on `/cache/permits`.
    /// Env: `CACHE_MAX_RESULTS_CAP`
    /// Default: `500`
    pub cache_max_results_cap: u32,

    /// When non-zero, minted credentials expire at most this many days after
    /// issuance (or after the permit starts), whatever the permit window.
    /// Env: `CREDENTIAL_MAX_VALIDITY_DAYS`
    /// Default: `0` (credential mirrors the permit window)
    pub credential_max_validity_days: u32,

    /// Sustained requests per second allowed per client IP.
    /// Env: `RATE_LIMIT_PER_SEC`
    pub rate_limit_per_sec: f64,

    /// Burst size per client IP.
    /// Env: `RATE_LIMIT_BURST`
    pub rate_limit_burst: f64,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    pub instance_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./data/fop.db"),
            signing_key_path: PathBuf::from("./data/signing.key"),
            signing_key: None,
            retired_public_keys: Vec::new(),
            admin_token: None,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            cache_max_results_cap: 500,
            credential_max_validity_days: 0,
            rate_limit_per_sec: 10.0,
            rate_limit_burst: 30.0,
            instance_name: "FOP Permit Server".to_string(),
        }
    }
}

// Secrets stay out of logs.
impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("signing_key_path", &self.signing_key_path)
            .field("signing_key", &self.signing_key.map(|_| "<inline>"))
            .field("retired_public_keys", &self.retired_public_keys.len())
            .field("admin_enabled", &self.admin_token.is_some())
            .field("max_batch_size", &self.max_batch_size)
            .field("cache_max_results_cap", &self.cache_max_results_cap)
            .field("credential_max_validity_days", &self.credential_max_validity_days)
            .field("rate_limit_per_sec", &self.rate_limit_per_sec)
            .field("rate_limit_burst", &self.rate_limit_burst)
            .field("instance_name", &self.instance_name)
            .finish()
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Some(path) = lookup("SIGNING_KEY_PATH") {
            config.signing_key_path = PathBuf::from(path);
        }

        if let Some(hex_key) = lookup("SIGNING_KEY") {
            match parse_hex_key(&hex_key) {
                Ok(key) => config.signing_key = Some(key),
                Err(e) => tracing::warn!(error = %e, "Invalid SIGNING_KEY, ignoring"),
            }
        }

        if let Some(list) = lookup("RETIRED_PUBLIC_KEYS") {
            for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                match parse_hex_key(item) {
                    Ok(key) => config.retired_public_keys.push(key),
                    Err(e) => tracing::warn!(error = %e, "Skipping invalid retired public key"),
                }
            }
        }

        if let Some(token) = lookup("ADMIN_TOKEN") {
            if !token.is_empty() {
                config.admin_token = Some(token);
            }
        }

        if let Some(val) = lookup("MAX_BATCH_SIZE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_batch_size = n,
                _ => tracing::warn!(value = %val, "Invalid MAX_BATCH_SIZE, using default"),
            }
        }

        if let Some(val) = lookup("CACHE_MAX_RESULTS_CAP") {
            match val.parse::<u32>() {
                Ok(n) if n > 0 => config.cache_max_results_cap = n,
                _ => tracing::warn!(value = %val, "Invalid CACHE_MAX_RESULTS_CAP, using default"),
            }
        }

        if let Some(val) = lookup("CREDENTIAL_MAX_VALIDITY_DAYS") {
            if let Ok(n) = val.parse::<u32>() {
                config.credential_max_validity_days = n;
            }
        }

        if let Some(val) = lookup("RATE_LIMIT_PER_SEC") {
            if let Ok(n) = val.parse::<f64>() {
                config.rate_limit_per_sec = n;
            }
        }

        if let Some(val) = lookup("RATE_LIMIT_BURST") {
            if let Ok(n) = val.parse::<f64>() {
                config.rate_limit_burst = n;
            }
        }

        if let Some(name) = lookup("INSTANCE_NAME") {
            config.instance_name = name;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

/// Parse a 64-character hex string into a 32-byte array.
pub fn parse_hex_key(hex: &str) -> Result<[u8; 32], String> {
    let hex = hex.trim();
    if hex.len() != 64 {
        return Err(format!("expected 64 hex chars, got {}", hex.len()));
    }
    let bytes = hex::decode(hex).map_err(|e| format!("invalid hex: {e}"))?;
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_map(vars: &[(&str, &str)]) -> ServerConfig {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert!(config.signing_key.is_none());
        assert_eq!(config.max_batch_size, 500);
    }

    #[test]
    fn test_overrides() {
        let key = "ab".repeat(32);
        let retired = format!("{}, {}", "01".repeat(32), "zz");
        let config = from_map(&[
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("SIGNING_KEY", key.as_str()),
            ("RETIRED_PUBLIC_KEYS", retired.as_str()),
            ("ADMIN_TOKEN", "s3cret"),
            ("MAX_BATCH_SIZE", "0"),
            ("CACHE_MAX_RESULTS_CAP", "50"),
        ]);
        assert_eq!(config.http_addr, ([127, 0, 0, 1], 9000).into());
        assert_eq!(config.signing_key, Some([0xab; 32]));
        assert_eq!(config.retired_public_keys, vec![[0x01; 32]]);
        assert_eq!(config.admin_token.as_deref(), Some("s3cret"));
        assert_eq!(config.max_batch_size, 500);
        assert_eq!(config.cache_max_results_cap, 50);
    }

    #[test]
    fn test_parse_hex_key_wrong_length() {
        assert!(parse_hex_key("abcd").is_err());
        assert!(parse_hex_key(&"gg".repeat(32)).is_err());
    }

    #[test]
    fn test_debug_hides_secrets() {
        let config = from_map(&[("ADMIN_TOKEN", "s3cret"), ("SIGNING_KEY", "cd".repeat(32).as_str())]);
        let printed = format!("{config:?}");
        assert!(!printed.contains("s3cret"));
        assert!(!printed.contains("cdcd"));
    }
}
