//! Audit sink — a write-once record of every stage of every run.
//!
//! One record per stage per analysis, regardless of stage success. Sinks
//! must tolerate concurrent appends from independent runs; records for
//! distinct analysis ids never collide.

pub mod sqlite;

pub use sqlite::SqliteAuditSink;

use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Audit storage error: {0}")]
    Storage(String),
}

/// Generation settings and timing captured alongside a stage payload.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionMetadata {
    pub temperature: f32,
    pub max_tokens: u32,
    pub execution_time_ms: u64,
    pub purpose: String,
}

/// One stage of one run, as persisted.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub analysis_id: Uuid,
    pub stage_id: String,
    pub stage_name: String,
    pub stage_kind: String,
    pub payload: Value,
    pub metadata: ExecutionMetadata,
    pub success: bool,
}

/// Destination for audit records.
pub trait AuditSink {
    fn record(&self, record: &AuditRecord) -> Result<(), AuditError>;
}

impl<S: AuditSink> AuditSink for Arc<S> {
    fn record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        (**self).record(record)
    }
}

/// In-memory sink for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn count_for(&self, analysis_id: &Uuid) -> usize {
        self.records()
            .iter()
            .filter(|r| &r.analysis_id == analysis_id)
            .count()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        self.records
            .lock()
            .map_err(|_| AuditError::Storage("audit lock poisoned".to_string()))?
            .push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_record(analysis_id: Uuid, stage_id: &str) -> AuditRecord {
        AuditRecord {
            analysis_id,
            stage_id: stage_id.to_string(),
            stage_name: "Intake validation".to_string(),
            stage_kind: "validation".to_string(),
            payload: json!({"quality_score": 8}),
            metadata: ExecutionMetadata {
                temperature: 0.1,
                max_tokens: 512,
                execution_time_ms: 120,
                purpose: "validation".to_string(),
            },
            success: true,
        }
    }

    #[test]
    fn memory_sink_stores_records() {
        let sink = MemoryAuditSink::new();
        let id = Uuid::new_v4();
        sink.record(&sample_record(id, "intake_validation")).unwrap();
        sink.record(&sample_record(id, "risk_assessment")).unwrap();

        assert_eq!(sink.count_for(&id), 2);
        assert_eq!(sink.records()[0].stage_id, "intake_validation");
    }

    #[test]
    fn counts_are_scoped_per_analysis() {
        let sink = MemoryAuditSink::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        sink.record(&sample_record(a, "intake_validation")).unwrap();
        sink.record(&sample_record(b, "intake_validation")).unwrap();

        assert_eq!(sink.count_for(&a), 1);
        assert_eq!(sink.count_for(&b), 1);
    }

    #[test]
    fn arc_wrapper_delegates() {
        let sink = Arc::new(MemoryAuditSink::new());
        let id = Uuid::new_v4();
        AuditSink::record(&sink, &sample_record(id, "intake_validation")).unwrap();
        assert_eq!(sink.count_for(&id), 1);
    }

    #[test]
    fn record_serializes_with_metadata() {
        let record = sample_record(Uuid::new_v4(), "intake_validation");
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"temperature\":0.1"));
        assert!(json.contains("\"purpose\":\"validation\""));
        assert!(json.contains("\"success\":true"));
    }
}
