//! Accumulating analysis context threaded through pipeline stages.

use std::collections::BTreeMap;

use serde_json::Value;

/// Append-only record of one pipeline run: the original input payload,
/// externally supplied reference data, and each completed stage's payload
/// in execution order.
///
/// The context only grows. Earlier entries are never replaced, so a stage
/// prompt always sees exactly what its predecessors produced.
#[derive(Debug, Clone, Default)]
pub struct PipelineContext {
    input: Value,
    reference: BTreeMap<String, Value>,
    stages: Vec<(String, Value)>,
}

impl PipelineContext {
    pub fn new(input: Value, reference: BTreeMap<String, Value>) -> Self {
        Self {
            input,
            reference,
            stages: Vec::new(),
        }
    }

    /// The caller-supplied domain payload (questionnaire/site data).
    pub fn input(&self) -> &Value {
        &self.input
    }

    /// Reference data supplied alongside the input (weather snapshot,
    /// industry statistics, baseline assessment).
    pub fn reference(&self, key: &str) -> Option<&Value> {
        self.reference.get(key)
    }

    /// Record a completed stage's payload. Stage ids are unique within a
    /// run; if a duplicate ever appears, the earlier entry still wins on
    /// lookup.
    pub fn push_stage(&mut self, stage_id: &str, payload: Value) {
        self.stages.push((stage_id.to_string(), payload));
    }

    /// Payload of a previously executed stage.
    pub fn stage(&self, stage_id: &str) -> Option<&Value> {
        self.stages
            .iter()
            .find(|(id, _)| id == stage_id)
            .map(|(_, payload)| payload)
    }

    /// Number of stages recorded so far.
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// All recorded stage payloads in execution order.
    pub fn stages(&self) -> impl Iterator<Item = (&str, &Value)> + '_ {
        self.stages.iter().map(|(id, v)| (id.as_str(), v))
    }
}
