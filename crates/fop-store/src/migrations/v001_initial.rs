//! v001 -- Initial schema creation.
//!
//! Reference data fed by the permit workflow (`operators`, `permits`,
//! `officers`, `fee_rates`), minted credentials, the two offline record
//! tables and the telemetry sink.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Operators
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS operators (
    id         TEXT PRIMARY KEY NOT NULL,
    name       TEXT NOT NULL,
    country    TEXT,
    active     INTEGER NOT NULL DEFAULT 1,   -- boolean 0/1
    updated_at TEXT NOT NULL                 -- RFC-3339
);

-- ----------------------------------------------------------------
-- Permits (authoritative state)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS permits (
    id                    TEXT PRIMARY KEY NOT NULL,
    permit_number         TEXT NOT NULL UNIQUE,
    operator_id           TEXT NOT NULL,
    aircraft_registration TEXT NOT NULL,
    valid_from            TEXT NOT NULL,     -- ISO date
    valid_until           TEXT NOT NULL,     -- ISO date
    status                TEXT NOT NULL,
    updated_at            TEXT NOT NULL,

    FOREIGN KEY (operator_id) REFERENCES operators(id)
);

CREATE INDEX IF NOT EXISTS idx_permits_operator ON permits(operator_id);
CREATE INDEX IF NOT EXISTS idx_permits_status_until ON permits(status, valid_until);

-- ----------------------------------------------------------------
-- Field officers
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS officers (
    id         TEXT PRIMARY KEY NOT NULL,
    name       TEXT NOT NULL,
    airport    TEXT,
    active     INTEGER NOT NULL DEFAULT 1,
    updated_at TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Fee rates
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS fee_rates (
    id             TEXT PRIMARY KEY NOT NULL, -- UUID v4
    service_type   TEXT NOT NULL,
    unit           TEXT NOT NULL,
    rate           INTEGER NOT NULL,          -- minor currency units
    currency       TEXT NOT NULL,
    effective_from TEXT NOT NULL,             -- ISO date
    active         INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_fee_rates_service ON fee_rates(service_type, effective_from DESC);

-- ----------------------------------------------------------------
-- Issued credentials
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS issued_credentials (
    id          TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    permit_id   TEXT NOT NULL,
    key_id      TEXT NOT NULL,
    token       TEXT NOT NULL,
    valid_until TEXT NOT NULL,
    issued_at   TEXT NOT NULL,

    FOREIGN KEY (permit_id) REFERENCES permits(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_credentials_permit ON issued_credentials(permit_id, issued_at DESC);

-- ----------------------------------------------------------------
-- Verification logs
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS verification_logs (
    id                  TEXT PRIMARY KEY NOT NULL,  -- server UUID v4
    client_record_id    TEXT NOT NULL UNIQUE,       -- dedup key
    device_id           TEXT NOT NULL,
    officer_id          TEXT NOT NULL,
    officer_name        TEXT NOT NULL,
    scanned_raw_content TEXT NOT NULL,
    permit_id           TEXT,                       -- not a FK: may be unresolved
    permit_number       TEXT,
    result              TEXT NOT NULL,
    failure_reason      TEXT,
    latitude            REAL,
    longitude           REAL,
    accuracy_meters     REAL,
    airport             TEXT,
    verified_at         TEXT NOT NULL,
    scan_duration_ms    INTEGER,
    was_offline         INTEGER NOT NULL,
    synced_at           TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_verification_permit ON verification_logs(permit_id, verified_at DESC);

-- ----------------------------------------------------------------
-- Service logs
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS service_logs (
    id                TEXT PRIMARY KEY NOT NULL,
    client_record_id  TEXT NOT NULL UNIQUE,
    device_id         TEXT NOT NULL,
    officer_id        TEXT NOT NULL,
    officer_name      TEXT NOT NULL,
    operator_id       TEXT NOT NULL,
    permit_id         TEXT,
    service_type      TEXT NOT NULL,
    quantity          REAL NOT NULL CHECK (quantity > 0),
    unit              TEXT NOT NULL,
    fee_amount        INTEGER NOT NULL CHECK (fee_amount >= 0),
    currency          TEXT NOT NULL,
    notes             TEXT,
    latitude          REAL,
    longitude         REAL,
    accuracy_meters   REAL,
    airport           TEXT,
    logged_at         TEXT NOT NULL,
    status            TEXT NOT NULL,
    invoice_ref       TEXT,
    cancel_reason     TEXT,
    synced_at         TEXT NOT NULL,
    status_changed_at TEXT NOT NULL,

    FOREIGN KEY (operator_id) REFERENCES operators(id)
);

CREATE INDEX IF NOT EXISTS idx_service_logs_operator_status ON service_logs(operator_id, status);

-- ----------------------------------------------------------------
-- Telemetry (fire-and-forget)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS telemetry_events (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    device_id   TEXT NOT NULL,
    event_type  TEXT NOT NULL,
    payload     TEXT NOT NULL,                -- JSON
    occurred_at TEXT NOT NULL,
    received_at TEXT NOT NULL
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
