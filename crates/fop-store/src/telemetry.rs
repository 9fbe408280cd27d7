use chrono::{DateTime, Utc};
use rusqlite::params;

use fop_shared::telemetry::TelemetryEvent;

use crate::columns::timestamp_col;
use crate::database::Database;
use crate::error::Result;
use crate::models::StoredTelemetryEvent;

impl Database {
    /// Append device events. No deduplication: telemetry is diagnostic only.
    pub fn insert_telemetry_events(
        &mut self,
        device_id: &str,
        events: &[TelemetryEvent],
        received_at: DateTime<Utc>,
    ) -> Result<usize> {
        let tx = self.conn_mut().transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO telemetry_events (device_id, event_type, payload, occurred_at, received_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for event in events {
                stmt.execute(params![
                    device_id,
                    event.event_type,
                    serde_json::to_string(&event.payload)?,
                    event.occurred_at.to_rfc3339(),
                    received_at.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(events.len())
    }

    pub fn recent_telemetry(&self, device_id: &str, limit: u32) -> Result<Vec<StoredTelemetryEvent>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, device_id, event_type, payload, occurred_at, received_at
             FROM telemetry_events
             WHERE device_id = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![device_id, limit], |row| {
            let payload: String = row.get(3)?;
            Ok(StoredTelemetryEvent {
                id: row.get(0)?,
                device_id: row.get(1)?,
                event_type: row.get(2)?,
                payload: serde_json::from_str(&payload)
                    .map_err(|e| crate::columns::conversion_error(3, e))?,
                occurred_at: timestamp_col(row, 4)?,
                received_at: timestamp_col(row, 5)?,
            })
        })?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }
}
