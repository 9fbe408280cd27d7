use thiserror::Error;

use fop_shared::error::{CredentialError, IllegalTransition};

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Ledger error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server responded {status}: {message}")]
    Server { status: u16, message: String },

    #[error(transparent)]
    Transition(#[from] IllegalTransition),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Record {0} is already in the ledger")]
    DuplicateRecord(String),

    #[error("Device is not provisioned: {0}")]
    NotProvisioned(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Ledger migration failed: {0}")]
    Migration(String),
}

pub type Result<T> = std::result::Result<T, DeviceError>;
