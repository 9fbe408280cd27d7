//! The snapshot a device verifies against while disconnected.
//!
//! Revocations made after `provisioned_at` are invisible here until the next
//! refresh. The cache never claims a permit does not exist: it only holds
//! the slice of permits the server chose to provision.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use fop_shared::cache::{CachedFeeRate, CachedFeeRates, CachedPermitSummary, CachedPermits, PublicKeySet};
use fop_shared::verifier::{KeyRing, PermitLookup, PermitLookupResult, PermitState};

use crate::error::Result;
use crate::ledger::Ledger;

const KEY_PUBLIC_KEYS: &str = "public_keys";
const KEY_PERMITS: &str = "permits";
const KEY_FEE_RATES: &str = "fee_rates";

pub struct ProvisionedCache {
    public_keys: PublicKeySet,
    permits: CachedPermits,
    fee_rates: CachedFeeRates,
    key_ring: KeyRing,
    by_id: HashMap<String, usize>,
    by_number: HashMap<String, usize>,
}

impl ProvisionedCache {
    pub fn new(
        public_keys: PublicKeySet,
        permits: CachedPermits,
        fee_rates: CachedFeeRates,
    ) -> Result<Self> {
        let key_ring = KeyRing::from_key_set(&public_keys)?;

        let mut by_id = HashMap::with_capacity(permits.permits.len());
        let mut by_number = HashMap::with_capacity(permits.permits.len());
        for (i, permit) in permits.permits.iter().enumerate() {
            by_id.insert(permit.permit_id.clone(), i);
            by_number.insert(permit.permit_number.clone(), i);
        }

        Ok(Self {
            public_keys,
            permits,
            fee_rates,
            key_ring,
            by_id,
            by_number,
        })
    }

    /// Restore the snapshot saved by [`persist`](Self::persist), if any.
    pub fn load(ledger: &Ledger) -> Result<Option<Self>> {
        let keys = ledger.load_provisioning::<PublicKeySet>(KEY_PUBLIC_KEYS)?;
        let permits = ledger.load_provisioning::<CachedPermits>(KEY_PERMITS)?;
        let fee_rates = ledger.load_provisioning::<CachedFeeRates>(KEY_FEE_RATES)?;

        match (keys, permits, fee_rates) {
            (Some(keys), Some(permits), Some(fee_rates)) => Ok(Some(Self::new(keys, permits, fee_rates)?)),
            _ => Ok(None),
        }
    }

    pub fn persist(&self, ledger: &Ledger, now: DateTime<Utc>) -> Result<()> {
        ledger.save_provisioning(KEY_PUBLIC_KEYS, &self.public_keys, now)?;
        ledger.save_provisioning(KEY_PERMITS, &self.permits, now)?;
        ledger.save_provisioning(KEY_FEE_RATES, &self.fee_rates, now)?;
        Ok(())
    }

    pub fn key_ring(&self) -> &KeyRing {
        &self.key_ring
    }

    pub fn provisioned_at(&self) -> DateTime<Utc> {
        self.permits.provisioned_at
    }

    /// Whether the permit snapshot is older than `max_age`.
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        now - self.provisioned_at() > max_age
    }

    pub fn permit_count(&self) -> usize {
        self.permits.permits.len()
    }

    pub fn permit(&self, permit_id: &str) -> Option<&CachedPermitSummary> {
        self.by_id.get(permit_id).map(|&i| &self.permits.permits[i])
    }

    /// Manual lookup when a QR code will not scan.
    pub fn permit_by_number(&self, permit_number: &str) -> Option<&CachedPermitSummary> {
        self.by_number
            .get(permit_number)
            .map(|&i| &self.permits.permits[i])
    }

    /// Current rate for a service, as shown to the officer when logging it.
    pub fn fee_rate(&self, service_type: &str, unit: &str) -> Option<&CachedFeeRate> {
        self.fee_rates
            .fee_rates
            .iter()
            .find(|r| r.service_type == service_type && r.unit == unit)
    }
}

impl PermitLookup for ProvisionedCache {
    /// Absence from the cache is not evidence of absence: it yields
    /// `Unknown`, never `NotFound`.
    fn lookup_permit(&self, permit_id: &str) -> PermitLookupResult {
        match self.permit(permit_id) {
            Some(p) => PermitLookupResult::Found(PermitState {
                status: p.status,
                valid_until: p.valid_until,
            }),
            None => PermitLookupResult::Unknown,
        }
    }
}
