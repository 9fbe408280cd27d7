//! # fop-shared
//!
//! Types and pure logic shared by the permit server and field devices.
//!
//! Nothing in this crate performs I/O: the credential verifier must run
//! unmodified on a disconnected device and on the server.

pub mod cache;
pub mod constants;
pub mod credential;
pub mod error;
pub mod records;
pub mod signer;
pub mod sync;
pub mod telemetry;
pub mod types;
pub mod verifier;

pub use credential::{CredentialClaims, PermitCredential};
pub use error::CredentialError;
pub use signer::CredentialSigner;
pub use verifier::{verify, KeyRing, PermitLookup, PermitLookupResult, VerificationOutcome};
