use rusqlite::Connection;

/// A `client_record_id` names one logical action, so it may appear in only
/// one of the two record tables.
const UP_SQL: &str = r#"
CREATE TRIGGER IF NOT EXISTS verification_logs_client_id_unused
BEFORE INSERT ON verification_logs
WHEN EXISTS (SELECT 1 FROM service_logs WHERE client_record_id = NEW.client_record_id)
BEGIN
    SELECT RAISE(ABORT, 'client_record_id already used by a service log');
END;

CREATE TRIGGER IF NOT EXISTS service_logs_client_id_unused
BEFORE INSERT ON service_logs
WHEN EXISTS (SELECT 1 FROM verification_logs WHERE client_record_id = NEW.client_record_id)
BEGIN
    SELECT RAISE(ABORT, 'client_record_id already used by a verification log');
END;
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
