//! Minting and persistence of permit credentials.

use std::sync::Arc;

use chrono::{DateTime, Days, NaiveDate, Utc};
use tracing::info;

use fop_shared::credential::PermitSnapshot;
use fop_shared::signer::CredentialSigner;
use fop_store::IssuedCredential;

use crate::api::SharedDatabase;
use crate::error::ServerError;

#[derive(Clone)]
pub struct CredentialIssuer {
    db: SharedDatabase,
    signer: Arc<CredentialSigner>,
    /// Zero means the credential mirrors the permit window.
    max_validity_days: u32,
}

impl CredentialIssuer {
    pub fn new(db: SharedDatabase, signer: Arc<CredentialSigner>, max_validity_days: u32) -> Self {
        Self {
            db,
            signer,
            max_validity_days,
        }
    }

    /// Mint a credential from the permit's current authoritative state and
    /// store it as the permit's latest credential.
    ///
    /// Only active permits are issued: a token embedding any other status
    /// could never verify.
    pub async fn issue(
        &self,
        permit_id: &str,
        now: DateTime<Utc>,
    ) -> Result<IssuedCredential, ServerError> {
        let db = self.db.lock().await;
        let mut snapshot = db.permit_snapshot(permit_id)?;

        if !snapshot.status.is_active() {
            return Err(ServerError::Conflict(format!(
                "permit {permit_id} is {}, only Active permits are issued credentials",
                snapshot.status
            )));
        }
        if snapshot.valid_until < now.date_naive() {
            return Err(ServerError::Conflict(format!(
                "permit {permit_id} expired on {}",
                snapshot.valid_until
            )));
        }

        snapshot.valid_until = clamp_validity(&snapshot, now.date_naive(), self.max_validity_days);

        let credential = self.signer.mint(&snapshot, now)?;
        let issued = db.insert_issued_credential(&credential)?;

        info!(
            permit_id,
            permit_number = %snapshot.permit_number,
            kid = %issued.key_id,
            valid_until = %issued.valid_until,
            "Credential issued"
        );
        Ok(issued)
    }
}

/// Shortens the window to `max(today, valid_from) + max_days`, never
/// extending it past the permit's own expiry.
fn clamp_validity(snapshot: &PermitSnapshot, today: NaiveDate, max_days: u32) -> NaiveDate {
    if max_days == 0 {
        return snapshot.valid_until;
    }
    let start = today.max(snapshot.valid_from);
    start
        .checked_add_days(Days::new(u64::from(max_days)))
        .map_or(snapshot.valid_until, |cap| cap.min(snapshot.valid_until))
}
