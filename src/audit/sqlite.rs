//! SQLite-backed audit sink.
//!
//! Appends are serialized behind a mutex; independent runs write disjoint
//! rows, so there is nothing to coordinate beyond the connection itself.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{AuditError, AuditRecord, AuditSink};

impl From<rusqlite::Error> for AuditError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

pub struct SqliteAuditSink {
    conn: Mutex<Connection>,
}

impl SqliteAuditSink {
    /// Open (or create) a file-backed audit database.
    pub fn open(path: &Path) -> Result<Self, AuditError> {
        let conn = Connection::open(path)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory sink, used by tests.
    pub fn open_in_memory() -> Result<Self, AuditError> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Number of records stored for one analysis.
    pub fn count_for(&self, analysis_id: &Uuid) -> Result<u64, AuditError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM analysis_audit WHERE analysis_id = ?1",
            params![analysis_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Stage ids recorded for one analysis, in write order.
    pub fn stage_ids_for(&self, analysis_id: &Uuid) -> Result<Vec<String>, AuditError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT stage_id FROM analysis_audit WHERE analysis_id = ?1 ORDER BY id ASC",
        )?;
        let ids = stmt
            .query_map(params![analysis_id.to_string()], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, AuditError> {
        self.conn
            .lock()
            .map_err(|_| AuditError::Storage("audit connection lock poisoned".to_string()))
    }
}

fn init_schema(conn: &Connection) -> Result<(), AuditError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS analysis_audit (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            analysis_id TEXT NOT NULL,
            stage_id TEXT NOT NULL,
            stage_name TEXT NOT NULL,
            stage_kind TEXT NOT NULL,
            payload TEXT NOT NULL,
            temperature REAL NOT NULL,
            max_tokens INTEGER NOT NULL,
            execution_time_ms INTEGER NOT NULL,
            purpose TEXT NOT NULL,
            success INTEGER NOT NULL,
            recorded_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_analysis_audit_analysis
            ON analysis_audit(analysis_id);",
    )?;
    Ok(())
}

impl AuditSink for SqliteAuditSink {
    fn record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let payload = serde_json::to_string(&record.payload)
            .map_err(|e| AuditError::Storage(e.to_string()))?;
        let recorded_at = chrono::Utc::now().to_rfc3339();

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO analysis_audit
             (analysis_id, stage_id, stage_name, stage_kind, payload,
              temperature, max_tokens, execution_time_ms, purpose, success, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.analysis_id.to_string(),
                record.stage_id,
                record.stage_name,
                record.stage_kind,
                payload,
                record.metadata.temperature as f64,
                record.metadata.max_tokens,
                record.metadata.execution_time_ms as i64,
                record.metadata.purpose,
                record.success,
                recorded_at,
            ],
        )?;
        Ok(())
    }
}
