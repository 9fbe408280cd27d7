//! The officer-facing workflow of a field device.
//!
//! A [`FieldStation`] verifies scans against its provisioned cache, writes
//! every verification and service it records to the ledger, and later drains
//! the ledger to the server in batches.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use fop_shared::records::{new_client_record_id, GeoLocation, ServiceLogRecord, VerificationRecord};
use fop_shared::sync::{SyncBatch, SyncRecord};
use fop_shared::telemetry::{TelemetryBatch, TelemetryEvent};
use fop_shared::verifier::{verify, PermitLookup, VerificationOutcome};

use crate::client::{SyncClient, SyncTransport};
use crate::config::DeviceConfig;
use crate::error::{DeviceError, Result};
use crate::ledger::{Ledger, LedgerCounts};
use crate::provision::ProvisionedCache;

/// Where and how a record was captured.
#[derive(Debug, Clone, Default)]
pub struct CaptureContext {
    pub location: Option<GeoLocation>,
    pub airport: Option<String>,
    pub scan_duration_ms: Option<u64>,
}

/// A service the officer is about to log.
#[derive(Debug, Clone)]
pub struct ServiceEntry {
    pub service_type: String,
    pub quantity: f64,
    pub unit: String,
    pub fee_amount: i64,
    pub currency: String,
    pub operator_id: String,
    pub permit_id: Option<String>,
    pub notes: Option<String>,
}

/// A completed scan: what the officer sees and the ledger id it was stored
/// under.
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub client_record_id: String,
    pub outcome: VerificationOutcome,
}

/// Totals of one [`FieldStation::sync`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub batches: u32,
    pub sent: u32,
    pub applied: u32,
    pub rejected: u32,
}

pub struct FieldStation<T> {
    config: DeviceConfig,
    ledger: Ledger,
    cache: Option<ProvisionedCache>,
    transport: T,
}

impl FieldStation<SyncClient> {
    /// Open the ledger named by `config` and restore the last provisioning
    /// snapshot.
    pub fn open(config: DeviceConfig) -> Result<Self> {
        let ledger = Ledger::open_at(&config.ledger_path)?;
        let transport = SyncClient::from_config(&config)?;
        Self::with_parts(config, ledger, transport)
    }
}

impl<T: SyncTransport> FieldStation<T> {
    pub fn with_parts(config: DeviceConfig, ledger: Ledger, transport: T) -> Result<Self> {
        let cache = ProvisionedCache::load(&ledger)?;
        // Uploads interrupted by a crash or power loss go out again.
        let interrupted = ledger.reset_uploaded()?;
        info!(
            device = %config.device_id,
            provisioned = cache.is_some(),
            interrupted,
            "Field station ready"
        );
        Ok(Self {
            config,
            ledger,
            cache,
            transport,
        })
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn cache(&self) -> Option<&ProvisionedCache> {
        self.cache.as_ref()
    }

    pub fn counts(&self) -> Result<LedgerCounts> {
        self.ledger.counts()
    }

    /// Pull keys, permits and fee rates, replacing the local snapshot only
    /// once all three have arrived.
    pub async fn refresh_provisioning(&mut self, operator_id: Option<&str>, now: DateTime<Utc>) -> Result<()> {
        let keys = self.transport.fetch_public_keys().await?;
        let permits = self.transport.fetch_permits(operator_id, None).await?;
        let fee_rates = self.transport.fetch_fee_rates().await?;

        let cache = ProvisionedCache::new(keys, permits, fee_rates)?;
        cache.persist(&self.ledger, now)?;
        info!(
            permits = cache.permit_count(),
            keys = cache.key_ring().len(),
            "Provisioning refreshed"
        );
        self.cache = Some(cache);
        Ok(())
    }

    /// Verify scanned content offline and record the attempt.
    ///
    /// Every scan is recorded, including garbage: the record documents what
    /// the officer saw.
    pub fn verify_scan(&self, raw: &str, ctx: CaptureContext, now: DateTime<Utc>) -> Result<ScanResult> {
        let cache = self
            .cache
            .as_ref()
            .ok_or_else(|| DeviceError::NotProvisioned("no verification keys cached".into()))?;

        let lookup: &dyn PermitLookup = cache;
        let outcome = verify(raw, now, cache.key_ring(), Some(lookup));

        let record = VerificationRecord {
            client_record_id: new_client_record_id(),
            scanned_raw_content: raw.to_string(),
            permit_id: outcome.permit_id().map(String::from),
            permit_number: outcome.permit_number().map(String::from),
            result: outcome.result,
            failure_reason: outcome.failure_reason.clone(),
            location: ctx.location,
            airport: ctx.airport,
            verified_at: now,
            scan_duration_ms: ctx.scan_duration_ms,
            was_offline_verification: true,
        };
        let client_record_id = record.client_record_id.clone();
        self.ledger.append(&SyncRecord::Verification(record), now)?;

        debug!(client_record_id = %client_record_id, result = %outcome.result, "Scan recorded");
        Ok(ScanResult {
            client_record_id,
            outcome,
        })
    }

    /// Record a chargeable service. Returns its client record id.
    pub fn log_service(&self, entry: ServiceEntry, ctx: CaptureContext, now: DateTime<Utc>) -> Result<String> {
        if entry.service_type.trim().is_empty()
            || entry.unit.trim().is_empty()
            || entry.currency.trim().is_empty()
            || entry.operator_id.trim().is_empty()
        {
            return Err(DeviceError::InvalidRecord(
                "service type, unit, currency and operator are required".into(),
            ));
        }
        if !(entry.quantity.is_finite() && entry.quantity > 0.0) {
            return Err(DeviceError::InvalidRecord("quantity must be greater than zero".into()));
        }
        if entry.fee_amount < 0 {
            return Err(DeviceError::InvalidRecord("fee must not be negative".into()));
        }

        let record = ServiceLogRecord {
            client_record_id: new_client_record_id(),
            service_type: entry.service_type,
            quantity: entry.quantity,
            unit: entry.unit,
            fee_amount: entry.fee_amount,
            currency: entry.currency,
            operator_id: entry.operator_id,
            permit_id: entry.permit_id,
            notes: entry.notes,
            location: ctx.location,
            airport: ctx.airport,
            logged_at: now,
        };
        let client_record_id = record.client_record_id.clone();
        self.ledger.append(&SyncRecord::ServiceLog(record), now)?;
        Ok(client_record_id)
    }

    /// Drain captured records to the server.
    ///
    /// A failed upload returns its records to `Captured` and stops the run;
    /// the next run resends them under the same ids.
    pub async fn sync(&mut self, now: DateTime<Utc>) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        loop {
            let entries = self.ledger.next_batch(self.config.sync_batch_size)?;
            if entries.is_empty() {
                break;
            }

            let ids: Vec<String> = entries.iter().map(|e| e.client_record_id.clone()).collect();
            self.ledger.mark_uploaded(&ids, now)?;

            let batch = SyncBatch {
                device_id: self.config.device_id.clone(),
                officer_id: self.config.officer_id.clone(),
                records: entries.into_iter().map(|e| e.record).collect(),
            };

            let result = match self.transport.push_batch(&batch).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(error = %e, records = ids.len(), "Upload failed, will retry");
                    self.ledger.reset_uploaded()?;
                    return Err(e);
                }
            };

            let summary = self.ledger.apply_outcomes(&result.outcomes, now)?;
            report.batches += 1;
            report.sent += ids.len() as u32;
            report.applied += summary.applied;
            report.rejected += summary.rejected;

            // Records the response did not settle go back to the queue for
            // the next run, not this one, so a server that keeps omitting
            // them cannot spin this loop.
            let unanswered = self.ledger.reset_ids(&ids)?;
            if unanswered > 0 {
                warn!(
                    sent = ids.len(),
                    unanswered,
                    "Sync response did not cover every record"
                );
                break;
            }
        }

        if report.batches > 0 {
            info!(
                batches = report.batches,
                sent = report.sent,
                applied = report.applied,
                rejected = report.rejected,
                "Sync finished"
            );
        }
        Ok(report)
    }

    /// Drop applied records older than `retain`.
    pub fn prune(&self, now: DateTime<Utc>, retain: Duration) -> Result<usize> {
        self.ledger.prune_applied(now - retain)
    }

    /// Best-effort diagnostics upload.
    pub async fn report_telemetry(&self, events: Vec<TelemetryEvent>) -> Result<usize> {
        if events.is_empty() {
            return Ok(0);
        }
        let batch = TelemetryBatch {
            device_id: self.config.device_id.clone(),
            events,
        };
        self.transport.push_telemetry(&batch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use chrono::{NaiveDate, TimeZone};
    use fop_shared::cache::{CachedFeeRates, CachedPermits, PublicKeySet};
    use fop_shared::credential::PermitSnapshot;
    use fop_shared::signer::CredentialSigner;
    use fop_shared::sync::{RecordOutcome, SyncResult};
    use fop_shared::types::{PermitStatus, RecordState, VerificationResult};
    use uuid::Uuid;

    use crate::provision::tests::{cache_for, summary};

    /// Stand-in server: deduplicates by client record id, can reject chosen
    /// ids, and can lose its response after applying a batch.
    struct FakeServer {
        signer: CredentialSigner,
        applied: Mutex<HashMap<String, Uuid>>,
        reject: HashSet<String>,
        drop_responses: AtomicU32,
        fail_before_apply: AtomicU32,
        /// Responses that answer only the first record of the batch.
        partial_responses: AtomicU32,
        batches: AtomicU32,
    }

    impl FakeServer {
        fn new(signer: CredentialSigner) -> Self {
            Self {
                signer,
                applied: Mutex::new(HashMap::new()),
                reject: HashSet::new(),
                drop_responses: AtomicU32::new(0),
                fail_before_apply: AtomicU32::new(0),
                partial_responses: AtomicU32::new(0),
                batches: AtomicU32::new(0),
            }
        }

        fn take(counter: &AtomicU32) -> bool {
            counter
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }

        fn offline() -> DeviceError {
            DeviceError::Server {
                status: 503,
                message: "unreachable".into(),
            }
        }
    }

    impl SyncTransport for &FakeServer {
        async fn fetch_public_keys(&self) -> Result<PublicKeySet> {
            Ok(PublicKeySet {
                keys: vec![self.signer.public_key()],
            })
        }

        async fn fetch_permits(&self, _: Option<&str>, _: Option<u32>) -> Result<CachedPermits> {
            Ok(CachedPermits {
                provisioned_at: Utc::now(),
                permits: vec![summary(
                    "p-1",
                    PermitStatus::Active,
                    NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
                )],
            })
        }

        async fn fetch_fee_rates(&self) -> Result<CachedFeeRates> {
            Ok(CachedFeeRates {
                provisioned_at: Utc::now(),
                fee_rates: vec![],
            })
        }

        async fn push_batch(&self, batch: &SyncBatch) -> Result<SyncResult> {
            if FakeServer::take(&self.fail_before_apply) {
                return Err(FakeServer::offline());
            }
            self.batches.fetch_add(1, Ordering::SeqCst);

            let mut applied = self.applied.lock().unwrap();
            let mut outcomes: Vec<RecordOutcome> = batch
                .records
                .iter()
                .map(|record| {
                    let id = record.client_record_id().to_string();
                    if self.reject.contains(&id) {
                        RecordOutcome::rejected(record, "unknown operator op-9")
                    } else if let Some(server_id) = applied.get(&id) {
                        RecordOutcome::already_applied(record, *server_id)
                    } else {
                        let server_id = Uuid::new_v4();
                        applied.insert(id, server_id);
                        RecordOutcome::applied(record, server_id)
                    }
                })
                .collect();

            if FakeServer::take(&self.partial_responses) {
                outcomes.truncate(1);
            }
            if FakeServer::take(&self.drop_responses) {
                return Err(FakeServer::offline());
            }
            Ok(SyncResult::new(&batch.device_id, Utc::now(), outcomes))
        }

        async fn push_telemetry(&self, batch: &TelemetryBatch) -> Result<usize> {
            Ok(batch.events.len())
        }
    }

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 10, 0, 0).unwrap()
    }

    fn config() -> DeviceConfig {
        let mut config = DeviceConfig::new("http://unused", "handset-12", "off-1");
        config.sync_batch_size = 2;
        config
    }

    fn token(signer: &CredentialSigner) -> String {
        signer
            .mint(
                &PermitSnapshot {
                    permit_id: "p-1".into(),
                    permit_number: "FOP-p-1".into(),
                    operator_name: "Atlantic Charter".into(),
                    aircraft_registration: "G-ABCD".into(),
                    valid_from: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                    valid_until: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
                    status: PermitStatus::Active,
                },
                at(2024, 1, 2),
            )
            .unwrap()
            .token
    }

    fn landing() -> ServiceEntry {
        ServiceEntry {
            service_type: "Landing".into(),
            quantity: 1.0,
            unit: "landing".into(),
            fee_amount: 25_000,
            currency: "USD".into(),
            operator_id: "op-1".into(),
            permit_id: Some("p-1".into()),
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_unprovisioned_station_refuses_to_verify() {
        let server = FakeServer::new(CredentialSigner::generate());
        let station = FieldStation::with_parts(config(), Ledger::open_in_memory().unwrap(), &server).unwrap();
        assert!(matches!(
            station.verify_scan("anything", CaptureContext::default(), Utc::now()),
            Err(DeviceError::NotProvisioned(_))
        ));
    }

    #[tokio::test]
    async fn test_offline_scan_is_recorded() {
        let server = FakeServer::new(CredentialSigner::generate());
        let mut station =
            FieldStation::with_parts(config(), Ledger::open_in_memory().unwrap(), &server).unwrap();
        station.refresh_provisioning(None, at(2024, 6, 1)).await.unwrap();

        let ctx = CaptureContext {
            airport: Some("DNMM".into()),
            scan_duration_ms: Some(420),
            ..Default::default()
        };
        let good = station.verify_scan(&token(&server.signer), ctx.clone(), at(2024, 6, 15)).unwrap();
        assert!(good.outcome.is_valid);
        assert!(good.outcome.live_checked);

        let bad = station.verify_scan("not a credential", ctx, at(2024, 6, 15)).unwrap();
        assert_eq!(bad.outcome.result, VerificationResult::Malformed);

        let entry = station.ledger().entry(&good.client_record_id).unwrap().unwrap();
        assert_eq!(entry.state, RecordState::Captured);
        match entry.record {
            SyncRecord::Verification(r) => {
                assert_eq!(r.permit_id.as_deref(), Some("p-1"));
                assert_eq!(r.result, VerificationResult::Valid);
                assert!(r.was_offline_verification);
            }
            other => panic!("unexpected record {other:?}"),
        }
        assert_eq!(station.counts().unwrap().captured, 2);
    }

    #[tokio::test]
    async fn test_cache_lookup_sees_provisioned_revocation() {
        let signer = CredentialSigner::generate();
        let server = FakeServer::new(signer.clone());
        let ledger = Ledger::open_in_memory().unwrap();
        let revoked = cache_for(
            &signer,
            vec![summary("p-1", PermitStatus::Revoked, NaiveDate::from_ymd_opt(2024, 12, 31).unwrap())],
            at(2024, 6, 1),
        );
        revoked.persist(&ledger, at(2024, 6, 1)).unwrap();

        let station = FieldStation::with_parts(config(), ledger, &server).unwrap();
        let scan = station
            .verify_scan(&token(&signer), CaptureContext::default(), at(2024, 6, 15))
            .unwrap();
        assert_eq!(scan.outcome.result, VerificationResult::Revoked);
    }

    #[tokio::test]
    async fn test_sync_drains_ledger_in_batches() {
        let server = FakeServer::new(CredentialSigner::generate());
        let mut station =
            FieldStation::with_parts(config(), Ledger::open_in_memory().unwrap(), &server).unwrap();
        for _ in 0..5 {
            station.log_service(landing(), CaptureContext::default(), Utc::now()).unwrap();
        }

        let report = station.sync(Utc::now()).await.unwrap();
        assert_eq!(report, SyncReport { batches: 3, sent: 5, applied: 5, rejected: 0 });
        assert_eq!(station.counts().unwrap().applied, 5);

        // Nothing left to send.
        assert_eq!(station.sync(Utc::now()).await.unwrap(), SyncReport::default());
    }

    #[tokio::test]
    async fn test_lost_response_resend_is_already_applied() {
        let server = FakeServer::new(CredentialSigner::generate());
        server.drop_responses.store(1, Ordering::SeqCst);
        let mut station =
            FieldStation::with_parts(config(), Ledger::open_in_memory().unwrap(), &server).unwrap();
        let id = station.log_service(landing(), CaptureContext::default(), Utc::now()).unwrap();

        assert!(station.sync(Utc::now()).await.is_err());
        assert_eq!(station.ledger().entry(&id).unwrap().unwrap().state, RecordState::Captured);

        let report = station.sync(Utc::now()).await.unwrap();
        assert_eq!(report.applied, 1);
        let entry = station.ledger().entry(&id).unwrap().unwrap();
        assert_eq!(entry.state, RecordState::Applied);
        assert_eq!(entry.server_id, server.applied.lock().unwrap().get(&id).copied());
        assert_eq!(server.applied.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unanswered_records_are_resent() {
        let server = FakeServer::new(CredentialSigner::generate());
        server.partial_responses.store(1, Ordering::SeqCst);
        let mut station =
            FieldStation::with_parts(config(), Ledger::open_in_memory().unwrap(), &server).unwrap();
        let first = station.log_service(landing(), CaptureContext::default(), Utc::now()).unwrap();
        let second = station.log_service(landing(), CaptureContext::default(), Utc::now()).unwrap();

        let report = station.sync(Utc::now()).await.unwrap();
        assert_eq!((report.batches, report.sent, report.applied), (1, 2, 1));
        assert_eq!(station.ledger().entry(&first).unwrap().unwrap().state, RecordState::Applied);
        assert_eq!(station.ledger().entry(&second).unwrap().unwrap().state, RecordState::Captured);

        let report = station.sync(Utc::now()).await.unwrap();
        assert_eq!((report.batches, report.sent, report.applied), (1, 1, 1));
        assert_eq!(station.ledger().entry(&second).unwrap().unwrap().state, RecordState::Applied);
        assert_eq!(station.counts().unwrap().unsettled(), 0);
    }

    #[tokio::test]
    async fn test_offline_upload_keeps_records() {
        let server = FakeServer::new(CredentialSigner::generate());
        server.fail_before_apply.store(1, Ordering::SeqCst);
        let mut station =
            FieldStation::with_parts(config(), Ledger::open_in_memory().unwrap(), &server).unwrap();
        station.log_service(landing(), CaptureContext::default(), Utc::now()).unwrap();

        assert!(station.sync(Utc::now()).await.is_err());
        assert_eq!(station.counts().unwrap().captured, 1);
        assert_eq!(server.batches.load(Ordering::SeqCst), 0);

        station.sync(Utc::now()).await.unwrap();
        assert_eq!(station.counts().unwrap().applied, 1);
    }

    #[tokio::test]
    async fn test_rejected_records_are_kept_for_review() {
        let mut server = FakeServer::new(CredentialSigner::generate());
        let ledger = Ledger::open_in_memory().unwrap();
        let rejected_id = {
            let station = FieldStation::with_parts(config(), ledger, &server).unwrap();
            let id = station.log_service(landing(), CaptureContext::default(), Utc::now()).unwrap();
            (id, station.ledger)
        };
        server.reject.insert(rejected_id.0.clone());

        let mut station = FieldStation::with_parts(config(), rejected_id.1, &server).unwrap();
        let report = station.sync(Utc::now()).await.unwrap();
        assert_eq!(report.rejected, 1);

        let rejected = station.ledger().rejected(10).unwrap();
        assert_eq!(rejected[0].client_record_id, rejected_id.0);
        assert_eq!(rejected[0].rejection_reason.as_deref(), Some("unknown operator op-9"));

        // Rejected records are terminal and never resent.
        assert_eq!(station.sync(Utc::now()).await.unwrap().sent, 0);
        assert_eq!(station.prune(Utc::now() + Duration::days(30), Duration::days(1)).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_invalid_service_entry_is_not_recorded() {
        let server = FakeServer::new(CredentialSigner::generate());
        let station = FieldStation::with_parts(config(), Ledger::open_in_memory().unwrap(), &server).unwrap();
        let mut entry = landing();
        entry.quantity = 0.0;
        assert!(station.log_service(entry, CaptureContext::default(), Utc::now()).is_err());
        assert_eq!(station.counts().unwrap(), LedgerCounts::default());
    }

    #[tokio::test]
    async fn test_prune_after_sync() {
        let server = FakeServer::new(CredentialSigner::generate());
        let mut station =
            FieldStation::with_parts(config(), Ledger::open_in_memory().unwrap(), &server).unwrap();
        station.log_service(landing(), CaptureContext::default(), Utc::now()).unwrap();
        station.sync(Utc::now()).await.unwrap();

        assert_eq!(station.prune(Utc::now(), Duration::days(7)).unwrap(), 0);
        assert_eq!(station.prune(Utc::now() + Duration::days(8), Duration::days(7)).unwrap(), 1);
        assert_eq!(
            station
                .report_telemetry(vec![TelemetryEvent {
                    event_type: "prune".into(),
                    occurred_at: Utc::now(),
                    payload: serde_json::json!({ "pruned": 1 }),
                }])
                .await
                .unwrap(),
            1
        );
    }
}
