//! # fop-store
//!
//! System-of-record storage for the permit server, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed helpers per table. Offline
//! records are deduplicated by a UNIQUE `client_record_id` column with
//! insert-or-ignore semantics, so concurrent or repeated deliveries of the
//! same record resolve inside SQLite rather than in application code.

mod columns;
pub mod credentials;
pub mod database;
pub mod fee_rates;
pub mod migrations;
pub mod models;
pub mod officers;
pub mod permits;
pub mod service_logs;
pub mod sync_sessions;
pub mod telemetry;
pub mod verification_logs;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
pub use permits::LivePermit;
