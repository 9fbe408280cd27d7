use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension};

use fop_shared::cache::CachedPermitSummary;
use fop_shared::credential::PermitSnapshot;
use fop_shared::types::PermitStatus;
use fop_shared::verifier::{PermitLookup, PermitLookupResult, PermitState};

use crate::columns::{date_col, enum_col, timestamp_col};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Operator, Permit, PermitWithOperator};

const PERMIT_COLUMNS: &str = "p.id, p.permit_number, p.operator_id, p.aircraft_registration,
     p.valid_from, p.valid_until, p.status, p.updated_at, o.name";

impl Database {
    // -- operators --

    pub fn upsert_operator(&self, operator: &Operator) -> Result<()> {
        self.conn().execute(
            "INSERT INTO operators (id, name, country, active, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                country = excluded.country,
                active = excluded.active,
                updated_at = excluded.updated_at",
            params![
                operator.id,
                operator.name,
                operator.country,
                operator.active,
                operator.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_operator(&self, id: &str) -> Result<Option<Operator>> {
        let operator = self
            .conn()
            .query_row(
                "SELECT id, name, country, active, updated_at FROM operators WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Operator {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        country: row.get(2)?,
                        active: row.get(3)?,
                        updated_at: timestamp_col(row, 4)?,
                    })
                },
            )
            .optional()?;
        Ok(operator)
    }

    // -- permits --

    /// Insert or replace the authoritative state of a permit.
    ///
    /// The operator must already exist.
    pub fn upsert_permit(&self, permit: &Permit) -> Result<()> {
        if permit.valid_from > permit.valid_until {
            return Err(StoreError::Invalid(format!(
                "permit {} has valid_from after valid_until",
                permit.id
            )));
        }
        if self.get_operator(&permit.operator_id)?.is_none() {
            return Err(StoreError::Invalid(format!(
                "unknown operator {}",
                permit.operator_id
            )));
        }

        self.conn().execute(
            "INSERT INTO permits
                (id, permit_number, operator_id, aircraft_registration,
                 valid_from, valid_until, status, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                permit_number = excluded.permit_number,
                operator_id = excluded.operator_id,
                aircraft_registration = excluded.aircraft_registration,
                valid_from = excluded.valid_from,
                valid_until = excluded.valid_until,
                status = excluded.status,
                updated_at = excluded.updated_at",
            params![
                permit.id,
                permit.permit_number,
                permit.operator_id,
                permit.aircraft_registration,
                permit.valid_from.to_string(),
                permit.valid_until.to_string(),
                permit.status.as_str(),
                permit.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_permit(&self, id: &str) -> Result<Option<PermitWithOperator>> {
        let sql = format!(
            "SELECT {PERMIT_COLUMNS}
             FROM permits p JOIN operators o ON o.id = p.operator_id
             WHERE p.id = ?1"
        );
        let permit = self
            .conn()
            .query_row(&sql, params![id], row_to_permit)
            .optional()?;
        Ok(permit)
    }

    pub fn permit_exists(&self, id: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row("SELECT 1 FROM permits WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(found.is_some())
    }

    pub fn find_permit_id_by_number(&self, permit_number: &str) -> Result<Option<String>> {
        let id = self
            .conn()
            .query_row(
                "SELECT id FROM permits WHERE permit_number = ?1",
                params![permit_number],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Snapshot of a permit in the shape the credential signer takes.
    pub fn permit_snapshot(&self, id: &str) -> Result<PermitSnapshot> {
        let found = self.get_permit(id)?.ok_or(StoreError::NotFound)?;
        Ok(PermitSnapshot {
            permit_id: found.permit.id,
            permit_number: found.permit.permit_number,
            operator_name: found.operator_name,
            aircraft_registration: found.permit.aircraft_registration,
            valid_from: found.permit.valid_from,
            valid_until: found.permit.valid_until,
            status: found.permit.status,
        })
    }

    /// Active, unexpired permits a device is likely to scan, latest expiry
    /// first, each with its newest credential token.
    pub fn cached_permits(
        &self,
        operator_id: Option<&str>,
        today: NaiveDate,
        limit: u32,
    ) -> Result<Vec<CachedPermitSummary>> {
        let mut stmt = self.conn().prepare(
            "SELECT p.id, p.permit_number, p.operator_id, o.name, p.aircraft_registration,
                    p.valid_from, p.valid_until, p.status,
                    (SELECT c.token FROM issued_credentials c
                      WHERE c.permit_id = p.id
                      ORDER BY c.issued_at DESC LIMIT 1)
             FROM permits p JOIN operators o ON o.id = p.operator_id
             WHERE p.status = ?1
               AND p.valid_until >= ?2
               AND (?3 IS NULL OR p.operator_id = ?3)
             ORDER BY p.valid_until DESC, p.permit_number ASC
             LIMIT ?4",
        )?;

        let rows = stmt.query_map(
            params![
                PermitStatus::Active.as_str(),
                today.to_string(),
                operator_id,
                limit
            ],
            |row| {
                Ok(CachedPermitSummary {
                    permit_id: row.get(0)?,
                    permit_number: row.get(1)?,
                    operator_id: row.get(2)?,
                    operator_name: row.get(3)?,
                    aircraft_registration: row.get(4)?,
                    valid_from: date_col(row, 5)?,
                    valid_until: date_col(row, 6)?,
                    status: enum_col(row, 7)?,
                    credential_token: row.get(8)?,
                })
            },
        )?;

        let mut permits = Vec::new();
        for row in rows {
            permits.push(row?);
        }
        Ok(permits)
    }
}

/// Authoritative state of one permit, read before verification so a storage
/// failure surfaces as an error rather than letting embedded claims stand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivePermit {
    permit_id: String,
    state: Option<PermitState>,
}

impl LivePermit {
    pub fn permit_id(&self) -> &str {
        &self.permit_id
    }

    pub fn state(&self) -> Option<&PermitState> {
        self.state.as_ref()
    }
}

impl Database {
    /// Load the current state of `permit_id` for an online check.
    pub fn live_permit(&self, permit_id: &str) -> Result<LivePermit> {
        let state = self.get_permit(permit_id)?.map(|found| PermitState {
            status: found.permit.status,
            valid_until: found.permit.valid_until,
        });
        Ok(LivePermit {
            permit_id: permit_id.to_string(),
            state,
        })
    }
}

impl PermitLookup for LivePermit {
    /// Never `Unknown`: the row was either read or its absence confirmed. A
    /// question about any other permit fails closed.
    fn lookup_permit(&self, permit_id: &str) -> PermitLookupResult {
        match &self.state {
            Some(state) if permit_id == self.permit_id => PermitLookupResult::Found(state.clone()),
            _ => PermitLookupResult::NotFound,
        }
    }
}

fn row_to_permit(row: &rusqlite::Row<'_>) -> rusqlite::Result<PermitWithOperator> {
    Ok(PermitWithOperator {
        permit: Permit {
            id: row.get(0)?,
            permit_number: row.get(1)?,
            operator_id: row.get(2)?,
            aircraft_registration: row.get(3)?,
            valid_from: date_col(row, 4)?,
            valid_until: date_col(row, 5)?,
            status: enum_col(row, 6)?,
            updated_at: timestamp_col(row, 7)?,
        },
        operator_name: row.get(8)?,
    })
}
