//! Read-only snapshots a field device pre-fetches before going offline.

use chrono::{DateTime, Utc};
use tracing::debug;

use fop_shared::cache::{CachedFeeRates, CachedPermits};
use fop_shared::constants::DEFAULT_CACHE_MAX_RESULTS;

use crate::api::SharedDatabase;
use crate::error::ServerError;

#[derive(Clone)]
pub struct Provisioner {
    db: SharedDatabase,
    max_results_cap: u32,
}

impl Provisioner {
    pub fn new(db: SharedDatabase, max_results_cap: u32) -> Self {
        Self {
            db,
            max_results_cap: max_results_cap.max(1),
        }
    }

    /// Requested page size, defaulted and clamped to `[1, cap]`.
    pub fn effective_limit(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(DEFAULT_CACHE_MAX_RESULTS)
            .clamp(1, self.max_results_cap)
    }

    /// Active permits still valid on `now`'s date, latest expiry first.
    pub async fn permits(
        &self,
        operator_id: Option<&str>,
        max_results: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<CachedPermits, ServerError> {
        let limit = self.effective_limit(max_results);
        let permits = {
            let db = self.db.lock().await;
            db.cached_permits(operator_id, now.date_naive(), limit)?
        };
        debug!(
            operator = operator_id.unwrap_or("*"),
            limit,
            count = permits.len(),
            "Provisioned permit cache"
        );
        Ok(CachedPermits {
            provisioned_at: now,
            permits,
        })
    }

    pub async fn fee_rates(&self, now: DateTime<Utc>) -> Result<CachedFeeRates, ServerError> {
        let fee_rates = {
            let db = self.db.lock().await;
            db.current_fee_rates(now.date_naive())?
        };
        Ok(CachedFeeRates {
            provisioned_at: now,
            fee_rates,
        })
    }
}
