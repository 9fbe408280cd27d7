//! Field device configuration.

use std::path::PathBuf;
use std::time::Duration;

use fop_shared::constants::DEFAULT_MAX_BATCH_SIZE;

use crate::error::{DeviceError, Result};

#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Base URL of the permit server, e.g. `https://fop.example.gov`.
    /// Env: `FOP_SERVER_URL`
    pub server_url: String,

    /// Stable identifier of this handset.
    /// Env: `FOP_DEVICE_ID`
    pub device_id: String,

    /// Officer signed in on this device. Stamped on every uploaded batch.
    /// Env: `FOP_OFFICER_ID`
    pub officer_id: String,

    /// Ledger database file.
    /// Env: `FOP_LEDGER_PATH`
    /// Default: the platform data directory
    pub ledger_path: PathBuf,

    /// Records per upload.
    /// Env: `FOP_SYNC_BATCH_SIZE`
    pub sync_batch_size: usize,

    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
}

impl DeviceConfig {
    pub fn new(
        server_url: impl Into<String>,
        device_id: impl Into<String>,
        officer_id: impl Into<String>,
    ) -> Self {
        Self {
            server_url: server_url.into(),
            device_id: device_id.into(),
            officer_id: officer_id.into(),
            ledger_path: default_ledger_path(),
            sync_batch_size: DEFAULT_MAX_BATCH_SIZE,
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary variable lookup. Server URL, device id and
    /// officer id are required.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| DeviceError::Config(format!("{key} is not set")))
        };

        let mut config = Self::new(
            required("FOP_SERVER_URL")?,
            required("FOP_DEVICE_ID")?,
            required("FOP_OFFICER_ID")?,
        );

        if let Some(path) = lookup("FOP_LEDGER_PATH") {
            config.ledger_path = PathBuf::from(path);
        }

        if let Some(val) = lookup("FOP_SYNC_BATCH_SIZE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.sync_batch_size = n,
                _ => tracing::warn!(value = %val, "Invalid FOP_SYNC_BATCH_SIZE, using default"),
            }
        }

        Ok(config)
    }
}

/// `<data dir>/ledger.db` for this application, or the working directory
/// when the platform has no data directory.
pub fn default_ledger_path() -> PathBuf {
    directories::ProjectDirs::from("org", "fop", "fop-field")
        .map(|dirs| dirs.data_dir().join("ledger.db"))
        .unwrap_or_else(|| PathBuf::from("./fop-ledger.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_required_variables() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("FOP_SERVER_URL", "https://fop.example.gov"),
            ("FOP_DEVICE_ID", "handset-12"),
        ]);
        let err = DeviceConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap_err();
        assert!(err.to_string().contains("FOP_OFFICER_ID"));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("FOP_SERVER_URL", "https://fop.example.gov"),
            ("FOP_DEVICE_ID", "handset-12"),
            ("FOP_OFFICER_ID", "off-1"),
            ("FOP_LEDGER_PATH", "/tmp/ledger.db"),
            ("FOP_SYNC_BATCH_SIZE", "zero"),
        ]);
        let config = DeviceConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.ledger_path, PathBuf::from("/tmp/ledger.db"));
        assert_eq!(config.sync_batch_size, DEFAULT_MAX_BATCH_SIZE);
    }
}
