use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use fop_shared::types::RecordKind;

use crate::columns::{enum_col, timestamp_col, uuid_col};
use crate::database::Database;
use crate::error::Result;
use crate::models::SyncSession;

impl Database {
    /// Kind and server id of whichever record already holds
    /// `client_record_id`. Ids are unique across both record tables.
    pub fn find_client_record(&self, client_record_id: &str) -> Result<Option<(RecordKind, Uuid)>> {
        let found = self
            .conn()
            .query_row(
                "SELECT 'verification', id FROM verification_logs WHERE client_record_id = ?1
                 UNION ALL
                 SELECT 'serviceLog', id FROM service_logs WHERE client_record_id = ?1
                 LIMIT 1",
                params![client_record_id],
                |row| Ok((enum_col(row, 0)?, uuid_col(row, 1)?)),
            )
            .optional()?;
        Ok(found)
    }

    pub fn insert_sync_session(&self, session: &SyncSession) -> Result<()> {
        self.conn().execute(
            "INSERT INTO sync_sessions
                (id, device_id, officer_id, received, applied, already_applied,
                 rejected, started_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                session.id.to_string(),
                session.device_id,
                session.officer_id,
                session.received,
                session.applied,
                session.already_applied,
                session.rejected,
                session.started_at.to_rfc3339(),
                session.completed_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Latest sync sessions for a device, newest first.
    pub fn recent_sync_sessions(&self, device_id: &str, limit: u32) -> Result<Vec<SyncSession>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, device_id, officer_id, received, applied, already_applied,
                    rejected, started_at, completed_at
             FROM sync_sessions
             WHERE device_id = ?1
             ORDER BY completed_at DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![device_id, limit], |row| {
            Ok(SyncSession {
                id: uuid_col(row, 0)?,
                device_id: row.get(1)?,
                officer_id: row.get(2)?,
                received: row.get(3)?,
                applied: row.get(4)?,
                already_applied: row.get(5)?,
                rejected: row.get(6)?,
                started_at: timestamp_col(row, 7)?,
                completed_at: timestamp_col(row, 8)?,
            })
        })?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?);
        }
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    use crate::service_logs::tests::{db, log as service_log};
    use crate::verification_logs::tests::log as verification_log;

    #[test]
    fn test_client_record_ids_are_shared_across_kinds() {
        let db = db();
        let id = db.insert_service_log(&service_log("dup-1")).unwrap().id();

        assert_eq!(
            db.find_client_record("dup-1").unwrap(),
            Some((RecordKind::ServiceLog, id))
        );
        assert!(db.find_client_record("absent").unwrap().is_none());

        // The schema refuses the reuse even if a caller skips the check.
        assert!(db.insert_verification_log(&verification_log("dup-1", None)).is_err());
        assert_eq!(db.total_verification_logs().unwrap(), 0);
    }

    #[test]
    fn test_recent_sessions_newest_first() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        for (i, device) in ["dev-1", "dev-1", "dev-2"].iter().enumerate() {
            db.insert_sync_session(&SyncSession {
                id: Uuid::new_v4(),
                device_id: device.to_string(),
                officer_id: "off-1".into(),
                received: 3,
                applied: i as u32,
                already_applied: 0,
                rejected: 0,
                started_at: now + Duration::seconds(i as i64),
                completed_at: now + Duration::seconds(i as i64),
            })
            .unwrap();
        }

        let sessions = db.recent_sync_sessions("dev-1", 10).unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].applied, 1);
    }
}
