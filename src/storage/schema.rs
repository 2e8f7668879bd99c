//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS components (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            component_type TEXT NOT NULL DEFAULT 'unknown',
            firmware_version TEXT NOT NULL DEFAULT '0.0.0',
            ip_address TEXT NOT NULL DEFAULT '0.0.0.0',
            criticality TEXT NOT NULL DEFAULT 'low',
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS telemetry_records (
            id INTEGER PRIMARY KEY,
            component_id INTEGER NOT NULL REFERENCES components(id),
            payload_json TEXT NOT NULL,
            severity TEXT NOT NULL DEFAULT 'normal',
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS security_events (
            id INTEGER PRIMARY KEY,
            severity TEXT NOT NULL,
            category TEXT NOT NULL,
            details TEXT NOT NULL,
            context_json TEXT,
            actor TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS patch_statuses (
            id INTEGER PRIMARY KEY,
            component_id INTEGER NOT NULL REFERENCES components(id),
            version TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            requested_by TEXT NOT NULL,
            notes TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_telemetry_created ON telemetry_records(created_at);
        CREATE INDEX IF NOT EXISTS idx_events_created ON security_events(created_at);
        CREATE INDEX IF NOT EXISTS idx_events_severity ON security_events(severity);
        CREATE INDEX IF NOT EXISTS idx_patch_component ON patch_statuses(component_id);",
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM components", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM patch_statuses", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap(); // Should not error
    }
}
