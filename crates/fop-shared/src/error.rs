use thiserror::Error;

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Invalid permit snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid key bytes")]
    InvalidKeyBytes,

    #[error("Invalid key encoding: {0}")]
    KeyEncoding(#[from] hex::FromHexError),
}

/// Error returned when a stored enum value does not name a known variant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Error returned for a state change the lifecycle does not allow.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Illegal transition from {from} to {to}")]
pub struct IllegalTransition {
    pub from: &'static str,
    pub to: &'static str,
}
