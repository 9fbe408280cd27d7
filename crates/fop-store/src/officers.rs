use rusqlite::{params, OptionalExtension};

use crate::columns::timestamp_col;
use crate::database::Database;
use crate::error::Result;
use crate::models::Officer;

impl Database {
    pub fn upsert_officer(&self, officer: &Officer) -> Result<()> {
        self.conn().execute(
            "INSERT INTO officers (id, name, airport, active, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                airport = excluded.airport,
                active = excluded.active,
                updated_at = excluded.updated_at",
            params![
                officer.id,
                officer.name,
                officer.airport,
                officer.active,
                officer.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_officer(&self, id: &str) -> Result<Option<Officer>> {
        let officer = self
            .conn()
            .query_row(
                "SELECT id, name, airport, active, updated_at FROM officers WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Officer {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        airport: row.get(2)?,
                        active: row.get(3)?,
                        updated_at: timestamp_col(row, 4)?,
                    })
                },
            )
            .optional()?;
        Ok(officer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_officer_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let officer = Officer {
            id: "off-1".into(),
            name: "J. Mensah".into(),
            airport: Some("DNMM".into()),
            active: true,
            updated_at: Utc::now(),
        };
        db.upsert_officer(&officer).unwrap();

        let found = db.get_officer("off-1").unwrap().unwrap();
        assert_eq!(found.name, "J. Mensah");
        assert!(found.active);
        assert!(db.get_officer("off-2").unwrap().is_none());
    }
}
