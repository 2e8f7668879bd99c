//! The narrow persistence interface between the core and durable storage.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use thiserror::Error;

use crate::detect::Severity;
use crate::patch::PatchState;
use crate::storage::Pool;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("no such row: {0}")]
    NotFound(String),
}

/// A registered grid-edge component.
#[derive(Debug, Clone)]
pub struct ComponentRow {
    pub id: i64,
    pub name: String,
    pub component_type: String,
    pub firmware_version: String,
    pub ip_address: String,
    pub criticality: String,
}

/// A component plus its most recent patch, for operator listings.
#[derive(Debug, Clone)]
pub struct ComponentSummary {
    pub component: ComponentRow,
    pub latest_patch_version: Option<String>,
    pub latest_patch_state: Option<PatchState>,
}

#[derive(Debug, Clone)]
pub struct SecurityEventRow {
    pub id: i64,
    pub severity: Severity,
    pub category: String,
    pub details: String,
    pub context: Option<serde_json::Value>,
    pub actor: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TelemetryRow {
    pub id: i64,
    pub component: String,
    pub payload: serde_json::Value,
    pub severity: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PatchRow {
    pub id: i64,
    pub component_id: i64,
    pub version: String,
    pub state: PatchState,
    pub requested_by: String,
    pub notes: String,
}

/// Durable storage operations the core needs. The engine and patch
/// manager call through this trait; everything else is a query surface
/// for the operator CLI.
pub trait Store: Send + Sync {
    /// Idempotent upsert-by-name with default fields on create.
    fn create_or_get_component(&self, name: &str) -> Result<ComponentRow, StoreError>;

    fn record_telemetry(
        &self,
        component_id: i64,
        payload: &serde_json::Value,
        severity: &str,
    ) -> Result<(), StoreError>;

    fn record_security_event(
        &self,
        severity: Severity,
        category: &str,
        details: &str,
        context: Option<serde_json::Value>,
        actor: Option<&str>,
    ) -> Result<i64, StoreError>;

    fn insert_patch_status(
        &self,
        component_id: i64,
        version: &str,
        state: PatchState,
        requested_by: &str,
        notes: &str,
    ) -> Result<i64, StoreError>;

    fn update_patch_status(&self, id: i64, state: PatchState, notes: &str)
        -> Result<(), StoreError>;

    fn get_patch_status(&self, id: i64) -> Result<PatchRow, StoreError>;

    fn list_events(
        &self,
        severity: Option<Severity>,
        category: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SecurityEventRow>, StoreError>;

    fn recent_telemetry(&self, limit: usize) -> Result<Vec<TelemetryRow>, StoreError>;

    fn list_components(&self) -> Result<Vec<ComponentSummary>, StoreError>;
}

/// SQLite-backed gateway over the shared connection pool.
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

fn parse_created_at(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

impl Store for SqliteStore {
    fn create_or_get_component(&self, name: &str) -> Result<ComponentRow, StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT OR IGNORE INTO components (name, created_at) VALUES (?1, ?2)",
            params![name, Utc::now().to_rfc3339()],
        )?;
        let row = conn.query_row(
            "SELECT id, name, component_type, firmware_version, ip_address, criticality
             FROM components WHERE name = ?1",
            params![name],
            |row| {
                Ok(ComponentRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    component_type: row.get(2)?,
                    firmware_version: row.get(3)?,
                    ip_address: row.get(4)?,
                    criticality: row.get(5)?,
                })
            },
        )?;
        Ok(row)
    }

    fn record_telemetry(
        &self,
        component_id: i64,
        payload: &serde_json::Value,
        severity: &str,
    ) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO telemetry_records (component_id, payload_json, severity, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                component_id,
                payload.to_string(),
                severity,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn record_security_event(
        &self,
        severity: Severity,
        category: &str,
        details: &str,
        context: Option<serde_json::Value>,
        actor: Option<&str>,
    ) -> Result<i64, StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO security_events (severity, category, details, context_json, actor, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                severity.as_str(),
                category,
                details,
                context.map(|c| c.to_string()),
                actor,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn insert_patch_status(
        &self,
        component_id: i64,
        version: &str,
        state: PatchState,
        requested_by: &str,
        notes: &str,
    ) -> Result<i64, StoreError> {
        let conn = self.pool.get()?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO patch_statuses (component_id, version, status, requested_by, notes, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![component_id, version, state.as_str(), requested_by, notes, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn update_patch_status(
        &self,
        id: i64,
        state: PatchState,
        notes: &str,
    ) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        let changed = conn.execute(
            "UPDATE patch_statuses SET status = ?2, notes = ?3, updated_at = ?4 WHERE id = ?1",
            params![id, state.as_str(), notes, Utc::now().to_rfc3339()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("patch status {id}")));
        }
        Ok(())
    }

    fn get_patch_status(&self, id: i64) -> Result<PatchRow, StoreError> {
        let conn = self.pool.get()?;
        conn.query_row(
            "SELECT id, component_id, version, status, requested_by, notes
             FROM patch_statuses WHERE id = ?1",
            params![id],
            |row| {
                let status: String = row.get(3)?;
                Ok(PatchRow {
                    id: row.get(0)?,
                    component_id: row.get(1)?,
                    version: row.get(2)?,
                    state: PatchState::parse(&status),
                    requested_by: row.get(4)?,
                    notes: row.get(5)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound(format!("patch status {id}")))
    }

    fn list_events(
        &self,
        severity: Option<Severity>,
        category: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SecurityEventRow>, StoreError> {
        let conn = self.pool.get()?;

        let mut sql = String::from(
            "SELECT id, severity, category, details, context_json, actor, created_at
             FROM security_events",
        );
        let mut clauses: Vec<&str> = Vec::new();
        let mut args: Vec<String> = Vec::new();
        if let Some(sev) = severity {
            clauses.push("severity = ?");
            args.push(sev.as_str().to_string());
        }
        if let Some(cat) = category {
            clauses.push("category = ?");
            args.push(cat.to_string());
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC LIMIT ");
        sql.push_str(&limit.to_string());

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), |row| {
            let severity: String = row.get(1)?;
            let context: Option<String> = row.get(4)?;
            let created_at: String = row.get(6)?;
            Ok(SecurityEventRow {
                id: row.get(0)?,
                severity: severity.parse().unwrap_or(Severity::Info),
                category: row.get(2)?,
                details: row.get(3)?,
                context: context.and_then(|c| serde_json::from_str(&c).ok()),
                actor: row.get(5)?,
                created_at: parse_created_at(&created_at),
            })
        })?;

        let mut events = Vec::new();
        for r in rows {
            events.push(r?);
        }
        Ok(events)
    }

    fn recent_telemetry(&self, limit: usize) -> Result<Vec<TelemetryRow>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT t.id, c.name, t.payload_json, t.severity, t.created_at
             FROM telemetry_records t
             JOIN components c ON c.id = t.component_id
             ORDER BY t.created_at DESC, t.id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            let payload: String = row.get(2)?;
            let created_at: String = row.get(4)?;
            Ok(TelemetryRow {
                id: row.get(0)?,
                component: row.get(1)?,
                payload: serde_json::from_str(&payload).unwrap_or_default(),
                severity: row.get(3)?,
                created_at: parse_created_at(&created_at),
            })
        })?;

        let mut records = Vec::new();
        for r in rows {
            records.push(r?);
        }
        Ok(records)
    }

    fn list_components(&self) -> Result<Vec<ComponentSummary>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, component_type, firmware_version, ip_address, criticality
             FROM components ORDER BY name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ComponentRow {
                id: row.get(0)?,
                name: row.get(1)?,
                component_type: row.get(2)?,
                firmware_version: row.get(3)?,
                ip_address: row.get(4)?,
                criticality: row.get(5)?,
            })
        })?;

        let mut summaries = Vec::new();
        for r in rows {
            let component = r?;
            let latest = conn
                .query_row(
                    "SELECT version, status FROM patch_statuses
                     WHERE component_id = ?1
                     ORDER BY created_at DESC, id DESC LIMIT 1",
                    params![component.id],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                )
                .optional()?;
            let (latest_patch_version, latest_patch_state) = match latest {
                Some((version, status)) => (Some(version), Some(PatchState::parse(&status))),
                None => (None, None),
            };
            summaries.push(ComponentSummary {
                component,
                latest_patch_version,
                latest_patch_state,
            });
        }
        Ok(summaries)
    }
}
