use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS sync_sessions (
    id              TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    device_id       TEXT NOT NULL,
    officer_id      TEXT NOT NULL,
    received        INTEGER NOT NULL,
    applied         INTEGER NOT NULL,
    already_applied INTEGER NOT NULL,
    rejected        INTEGER NOT NULL,
    started_at      TEXT NOT NULL,
    completed_at    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sync_sessions_device ON sync_sessions(device_id, completed_at DESC);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
