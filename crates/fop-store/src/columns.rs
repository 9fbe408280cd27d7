//! Column conversions shared by the row mappers.
//!
//! Timestamps are stored as RFC-3339 text, calendar dates as ISO `YYYY-MM-DD`
//! and enums by their canonical names.

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use fop_shared::error::UnknownVariant;
use fop_shared::records::GeoLocation;

/// Wrap a column conversion failure so it surfaces as a rusqlite error.
pub(crate) fn conversion_error<E>(column: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
}

pub(crate) fn enum_col<T>(row: &rusqlite::Row<'_>, column: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = UnknownVariant>,
{
    let value: String = row.get(column)?;
    value.parse::<T>().map_err(|e| conversion_error(column, e))
}

pub(crate) fn timestamp_col(row: &rusqlite::Row<'_>, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    let value: String = row.get(column)?;
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(column, e))
}

pub(crate) fn date_col(row: &rusqlite::Row<'_>, column: usize) -> rusqlite::Result<NaiveDate> {
    let value: String = row.get(column)?;
    value
        .parse::<NaiveDate>()
        .map_err(|e| conversion_error(column, e))
}

pub(crate) fn uuid_col(row: &rusqlite::Row<'_>, column: usize) -> rusqlite::Result<Uuid> {
    let value: String = row.get(column)?;
    Uuid::parse_str(&value).map_err(|e| conversion_error(column, e))
}

/// Read `latitude, longitude, accuracy_meters` starting at `first`.
pub(crate) fn location_cols(
    row: &rusqlite::Row<'_>,
    first: usize,
) -> rusqlite::Result<Option<GeoLocation>> {
    let latitude: Option<f64> = row.get(first)?;
    let longitude: Option<f64> = row.get(first + 1)?;
    let accuracy_meters: Option<f64> = row.get(first + 2)?;
    Ok(match (latitude, longitude) {
        (Some(latitude), Some(longitude)) => Some(GeoLocation {
            latitude,
            longitude,
            accuracy_meters,
        }),
        _ => None,
    })
}
