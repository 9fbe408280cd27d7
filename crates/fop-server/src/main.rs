//! # fop-server
//!
//! System-of-record server for Foreign Operator Permit credentials.
//!
//! This binary provides:
//! - **Credential issuance** with an Ed25519 signing key (`/admin/permits/:id/credential`)
//!   and the public key set devices verify against (`/public-key`)
//! - **Online verification** (`/verify`) using the same verifier field devices
//!   run offline, with the database as the live permit source
//! - **Cache provisioning** (`/cache/permits`, `/cache/fee-rates`) for devices
//!   about to lose connectivity
//! - **Sync reconciliation** (`/sync`) of offline verification and service
//!   records, idempotent per `clientRecordId`
//! - **Telemetry intake** and **per-IP rate limiting**

mod api;
mod config;
mod error;
mod issuer;
mod keys;
mod provision;
mod rate_limit;
mod sync;

use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use fop_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::keys::KeyMaterial;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,fop_server=debug")),
        )
        .init();

    info!("Starting FOP permit server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let db = Database::open_at(&config.database_path)?;
    info!(path = %config.database_path.display(), "Database ready");

    let keys = KeyMaterial::from_config(&config)?;
    let http_addr = config.http_addr;
    let app_state = AppState::new(db, keys, config);

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Evict rate-limit buckets idle for more than 10 minutes, every 5 minutes.
    let limiter = app_state.rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            let purged = limiter.purge_stale(Duration::from_secs(600)).await;
            if purged > 0 {
                tracing::debug!(purged, "Purged idle rate-limit buckets");
            }
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
