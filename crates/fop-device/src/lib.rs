//! # fop-device
//!
//! Field-device side of the permit system: verifies credentials with no
//! network, keeps an append-only ledger of what the officer recorded, and
//! reconciles that ledger with the server when connectivity returns.

pub mod client;
pub mod config;
pub mod error;
pub mod ledger;
pub mod provision;
pub mod station;

pub use client::{SyncClient, SyncTransport};
pub use config::DeviceConfig;
pub use error::{DeviceError, Result};
pub use ledger::{Ledger, LedgerCounts, LedgerEntry};
pub use provision::ProvisionedCache;
pub use station::{CaptureContext, FieldStation, ScanResult, ServiceEntry, SyncReport};
