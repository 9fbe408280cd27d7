use rusqlite::params;

use fop_shared::cache::CachedFeeRate;

use crate::columns::{date_col, uuid_col};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::FeeRate;

impl Database {
    pub fn insert_fee_rate(&self, rate: &FeeRate) -> Result<()> {
        if rate.rate < 0 {
            return Err(StoreError::Invalid("fee rate must not be negative".into()));
        }
        self.conn().execute(
            "INSERT INTO fee_rates (id, service_type, unit, rate, currency, effective_from, active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                rate.id.to_string(),
                rate.service_type,
                rate.unit,
                rate.rate,
                rate.currency,
                rate.effective_from.to_string(),
                rate.active,
            ],
        )?;
        Ok(())
    }

    pub fn list_fee_rates(&self) -> Result<Vec<FeeRate>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, service_type, unit, rate, currency, effective_from, active
             FROM fee_rates ORDER BY service_type ASC, effective_from DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(FeeRate {
                id: uuid_col(row, 0)?,
                service_type: row.get(1)?,
                unit: row.get(2)?,
                rate: row.get(3)?,
                currency: row.get(4)?,
                effective_from: date_col(row, 5)?,
                active: row.get(6)?,
            })
        })?;

        let mut rates = Vec::new();
        for row in rows {
            rates.push(row?);
        }
        Ok(rates)
    }

    /// The rate in force per `(service_type, unit)`: the active row with the
    /// latest `effective_from` not after `today`.
    pub fn current_fee_rates(&self, today: chrono::NaiveDate) -> Result<Vec<CachedFeeRate>> {
        let mut current: Vec<CachedFeeRate> = Vec::new();
        for rate in self.list_fee_rates()? {
            if !rate.active || rate.effective_from > today {
                continue;
            }
            // Rows arrive newest-first per service type.
            if current
                .iter()
                .any(|c| c.service_type == rate.service_type && c.unit == rate.unit)
            {
                continue;
            }
            current.push(CachedFeeRate {
                service_type: rate.service_type,
                unit: rate.unit,
                rate: rate.rate,
                currency: rate.currency,
                effective_from: rate.effective_from,
            });
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permits::tests::date;
    use uuid::Uuid;

    fn rate(service: &str, amount: i64, from: chrono::NaiveDate, active: bool) -> FeeRate {
        FeeRate {
            id: Uuid::new_v4(),
            service_type: service.into(),
            unit: "each".into(),
            rate: amount,
            currency: "USD".into(),
            effective_from: from,
            active,
        }
    }

    #[test]
    fn test_current_rates_pick_latest_effective() {
        let db = Database::open_in_memory().unwrap();
        db.insert_fee_rate(&rate("Landing", 20000, date(2023, 1, 1), true)).unwrap();
        db.insert_fee_rate(&rate("Landing", 25000, date(2024, 1, 1), true)).unwrap();
        db.insert_fee_rate(&rate("Landing", 30000, date(2025, 1, 1), true)).unwrap();
        db.insert_fee_rate(&rate("Parking", 500, date(2024, 1, 1), false)).unwrap();

        let current = db.current_fee_rates(date(2024, 6, 15)).unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].service_type, "Landing");
        assert_eq!(current[0].rate, 25000);
    }

    #[test]
    fn test_negative_rate_refused() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.insert_fee_rate(&rate("Landing", -1, date(2024, 1, 1), true)).is_err());
    }
}
