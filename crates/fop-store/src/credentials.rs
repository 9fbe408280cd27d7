use rusqlite::{params, OptionalExtension};

use fop_shared::credential::PermitCredential;

use crate::columns::{date_col, timestamp_col, uuid_col};
use crate::database::Database;
use crate::error::Result;
use crate::models::IssuedCredential;

impl Database {
    /// Record a freshly minted credential. Older credentials for the same
    /// permit stay on record; the newest one is served.
    pub fn insert_issued_credential(&self, credential: &PermitCredential) -> Result<IssuedCredential> {
        let issued = IssuedCredential {
            id: uuid::Uuid::new_v4(),
            permit_id: credential.claims.permit_id.clone(),
            key_id: credential.key_id.clone(),
            token: credential.token.clone(),
            valid_until: credential.claims.valid_until,
            issued_at: credential.claims.issued_at,
        };

        self.conn().execute(
            "INSERT INTO issued_credentials (id, permit_id, key_id, token, valid_until, issued_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                issued.id.to_string(),
                issued.permit_id,
                issued.key_id,
                issued.token,
                issued.valid_until.to_string(),
                issued.issued_at.to_rfc3339(),
            ],
        )?;

        Ok(issued)
    }

    pub fn latest_credential(&self, permit_id: &str) -> Result<Option<IssuedCredential>> {
        let credential = self
            .conn()
            .query_row(
                "SELECT id, permit_id, key_id, token, valid_until, issued_at
                 FROM issued_credentials
                 WHERE permit_id = ?1
                 ORDER BY issued_at DESC LIMIT 1",
                params![permit_id],
                |row| {
                    Ok(IssuedCredential {
                        id: uuid_col(row, 0)?,
                        permit_id: row.get(1)?,
                        key_id: row.get(2)?,
                        token: row.get(3)?,
                        valid_until: date_col(row, 4)?,
                        issued_at: timestamp_col(row, 5)?,
                    })
                },
            )
            .optional()?;
        Ok(credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permits::tests::{date, seed_operator, seed_permit};
    use chrono::{Duration, Utc};
    use fop_shared::signer::CredentialSigner;
    use fop_shared::types::PermitStatus;

    #[test]
    fn test_latest_credential_wins() {
        let db = Database::open_in_memory().unwrap();
        seed_operator(&db, "op-1", "Atlantic Charter");
        seed_permit(&db, "p-1", "op-1", date(2024, 12, 31), PermitStatus::Active);

        let signer = CredentialSigner::generate();
        let snapshot = db.permit_snapshot("p-1").unwrap();
        let first = signer.mint(&snapshot, Utc::now() - Duration::days(1)).unwrap();
        let second = signer.mint(&snapshot, Utc::now()).unwrap();
        db.insert_issued_credential(&first).unwrap();
        db.insert_issued_credential(&second).unwrap();

        let latest = db.latest_credential("p-1").unwrap().unwrap();
        assert_eq!(latest.token, second.token);
        assert!(db.latest_credential("p-2").unwrap().is_none());

        let cached = db.cached_permits(None, date(2024, 6, 1), 10).unwrap();
        assert_eq!(cached[0].credential_token.as_deref(), Some(second.token.as_str()));
    }
}
