//! Pipeline orchestrator — sequential stage execution with one safety net.
//!
//! Stages run strictly in order; each result is appended to the context
//! before the next prompt is built, and streamed to the audit sink. The
//! runner already absorbs every per-stage failure, so the only thing left
//! to catch here is a programming error escaping a contract — that is
//! converted into a one-paragraph error report rather than a panic in the
//! caller.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::audit::{AuditRecord, AuditSink, ExecutionMetadata};

use super::context::PipelineContext;
use super::ollama::LlmClient;
use super::runner::run_stage;
use super::stage::{StageContract, StageResult};

/// Run-level metadata returned with every outcome.
#[derive(Debug, Clone, Serialize)]
pub struct OutcomeMetadata {
    pub started_at: DateTime<Utc>,
    pub total_execution_time_ms: u64,
    pub stage_count: usize,
    pub degraded_stages: usize,
}

/// Everything a caller gets back from one pipeline run: every stage result
/// in order, plus the final narrative report. The report is never empty.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub analysis_id: Uuid,
    pub stages: Vec<StageResult>,
    pub report: String,
    pub metadata: OutcomeMetadata,
}

/// Orchestrates one ordered list of stage contracts over a model client,
/// streaming each stage to the audit sink.
pub struct AnalysisPipeline {
    llm: Box<dyn LlmClient + Send + Sync>,
    audit: Box<dyn AuditSink + Send + Sync>,
}

impl AnalysisPipeline {
    pub fn new(
        llm: Box<dyn LlmClient + Send + Sync>,
        audit: Box<dyn AuditSink + Send + Sync>,
    ) -> Self {
        Self { llm, audit }
    }

    /// Execute the given stages over the input payload.
    ///
    /// Never panics and never returns early: a failed stage contributes its
    /// fallback payload to the context and the run continues.
    pub fn run(
        &self,
        stages: &[Box<dyn StageContract>],
        input: Value,
        reference: BTreeMap<String, Value>,
    ) -> PipelineOutcome {
        let analysis_id = Uuid::new_v4();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.run_inner(analysis_id, stages, input, reference)
        }));

        match outcome {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::error!(
                    analysis_id = %analysis_id,
                    "Pipeline run panicked; producing error report"
                );
                Self::error_outcome(analysis_id)
            }
        }
    }

    fn run_inner(
        &self,
        analysis_id: Uuid,
        stages: &[Box<dyn StageContract>],
        input: Value,
        reference: BTreeMap<String, Value>,
    ) -> PipelineOutcome {
        let started_at = Utc::now();
        let start = Instant::now();
        let _span =
            tracing::info_span!("analysis_run", analysis_id = %analysis_id).entered();

        let mut ctx = PipelineContext::new(input, reference);
        let mut results: Vec<StageResult> = Vec::with_capacity(stages.len());

        for contract in stages {
            let result = run_stage(self.llm.as_ref(), contract.as_ref(), &ctx);

            let options = contract.options();
            let record = AuditRecord {
                analysis_id,
                stage_id: result.stage_id.clone(),
                stage_name: result.stage_name.clone(),
                stage_kind: result.kind.as_str().to_string(),
                payload: result.payload.clone(),
                metadata: ExecutionMetadata {
                    temperature: options.temperature,
                    max_tokens: options.max_tokens,
                    execution_time_ms: result.execution_time_ms,
                    purpose: result.kind.as_str().to_string(),
                },
                success: result.success,
            };
            if let Err(e) = self.audit.record(&record) {
                tracing::warn!(
                    analysis_id = %analysis_id,
                    stage = %result.stage_id,
                    error = %e,
                    "Audit write failed"
                );
            }

            ctx.push_stage(&result.stage_id, result.payload.clone());
            results.push(result);
        }

        let report = extract_report(&results)
            .unwrap_or_else(|| degraded_report(analysis_id, &results));

        let degraded_stages = results.iter().filter(|r| !r.success).count();
        let total_execution_time_ms = start.elapsed().as_millis() as u64;

        tracing::info!(
            stages = results.len(),
            degraded = degraded_stages,
            total_ms = total_execution_time_ms,
            "Analysis run complete"
        );

        PipelineOutcome {
            analysis_id,
            stages: results,
            report,
            metadata: OutcomeMetadata {
                started_at,
                total_execution_time_ms,
                stage_count: stages.len(),
                degraded_stages,
            },
        }
    }

    fn error_outcome(analysis_id: Uuid) -> PipelineOutcome {
        PipelineOutcome {
            analysis_id,
            stages: Vec::new(),
            report: format!(
                "The analysis engine hit an unexpected internal error and could not \
                 complete this run. No stage results are available. Re-run the \
                 analysis; if the problem persists, quote analysis id {analysis_id} \
                 to support."
            ),
            metadata: OutcomeMetadata {
                started_at: Utc::now(),
                total_execution_time_ms: 0,
                stage_count: 0,
                degraded_stages: 0,
            },
        }
    }
}

/// The report produced by the last stage that wrote one.
fn extract_report(results: &[StageResult]) -> Option<String> {
    results
        .iter()
        .rev()
        .find_map(|r| {
            r.payload
                .get("report")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .filter(|report| !report.trim().is_empty())
}

/// Last-resort report when no stage produced one (e.g. a preset without a
/// synthesis stage).
fn degraded_report(analysis_id: Uuid, results: &[StageResult]) -> String {
    let degraded = results.iter().filter(|r| !r.success).count();
    format!(
        "Analysis {analysis_id} completed {} stage(s), {degraded} in degraded mode. \
         No narrative report was produced; consult the per-stage structured payloads.",
        results.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::pipeline::ollama::{FailingLlmClient, MockLlmClient};
    use crate::pipeline::presets::{
        comparison_stages, emergency_plan_stages, safety_analysis_stages, REF_BASELINE,
    };
    use serde_json::json;
    use std::sync::Arc;

    fn complete_input() -> Value {
        json!({
            "site_name": "Depot 4",
            "work_description": "Roof membrane replacement",
            "crew_size": 12,
            "hazard_controls": "Guardrails, harness anchor points",
            "emergency_contact": "Site office, channel 2",
            "ppe_inventory": "Harnesses x12, helmets x12"
        })
    }

    fn scripted_safety_run() -> MockLlmClient {
        MockLlmClient::scripted(vec![
            // validation
            json!({"quality_score": 9, "data_quality": "HIGH", "missing_critical": [], "concerns": []})
                .to_string(),
            // risk
            json!({"hazards": [{
                "label": "fall from roof edge",
                "probability": 0.6,
                "consequence": "Fatal",
                "risk_score": 95,
                "inadequate_controls": ["no edge protection"]
            }]})
            .to_string(),
            // forecast
            json!({
                "incident": "Worker falls from roof edge",
                "confidence": "MEDIUM",
                "causal_chain": [
                    {"phase": "initiating_event", "description": "Material staged at the edge"},
                    {"phase": "first_defense_failure", "description": "Guardrail removed"},
                    {"phase": "human_factor", "description": "Worker steps back"},
                    {"phase": "point_of_no_return", "description": "Loss of balance"},
                    {"phase": "injury_mechanism", "description": "Impact with lower level"}
                ],
                "leading_indicators": ["Unpinned guardrails", "Edge storage", "No harnesses"],
                "intervention": "Reinstate edge protection"
            })
            .to_string(),
            // synthesis
            "The site presents one dominant hazard: the unprotected roof edge.".to_string(),
        ])
    }

    #[test]
    fn full_safety_run_produces_report_and_audit_trail() {
        let sink = Arc::new(MemoryAuditSink::new());
        let pipeline =
            AnalysisPipeline::new(Box::new(scripted_safety_run()), Box::new(Arc::clone(&sink)));
        let stages = safety_analysis_stages();

        let outcome = pipeline.run(&stages, complete_input(), BTreeMap::new());

        assert_eq!(outcome.stages.len(), 4);
        assert!(outcome.stages.iter().all(|s| s.success));
        assert!(outcome.report.contains("dominant hazard"));
        assert_eq!(outcome.metadata.degraded_stages, 0);
        assert_eq!(sink.count_for(&outcome.analysis_id), 4);
    }

    #[test]
    fn total_outage_still_yields_nonempty_report_and_full_audit() {
        let sink = Arc::new(MemoryAuditSink::new());
        let pipeline =
            AnalysisPipeline::new(Box::new(FailingLlmClient), Box::new(Arc::clone(&sink)));
        let stages = safety_analysis_stages();

        let outcome = pipeline.run(&stages, complete_input(), BTreeMap::new());

        assert_eq!(outcome.stages.len(), 4);
        assert!(outcome.stages.iter().all(|s| !s.success));
        assert!(!outcome.report.trim().is_empty());
        assert!(outcome.report.contains("degraded mode"));
        assert_eq!(outcome.metadata.degraded_stages, 4);
        // One audit record per configured stage, success or not
        assert_eq!(sink.count_for(&outcome.analysis_id), 4);
    }

    #[test]
    fn failed_stage_payload_feeds_later_stages() {
        // Validation fails to parse, but risk assessment still receives a
        // schema-valid validation payload via the fallback.
        let llm = MockLlmClient::scripted(vec![
            "not json at all".to_string(),
            json!({"hazards": [{
                "label": "slips",
                "probability": 0.3,
                "consequence": "Minor",
                "risk_score": 20,
                "inadequate_controls": []
            }]})
            .to_string(),
            json!({
                "incident": "Slip on access stairs",
                "confidence": "LOW",
                "causal_chain": [{"phase": "initiating_event", "description": "Wet stairs"}],
                "leading_indicators": ["Standing water", "Worn treads", "Poor lighting"],
                "intervention": "Install anti-slip nosing"
            })
            .to_string(),
            "Report text.".to_string(),
        ]);
        let sink = Arc::new(MemoryAuditSink::new());
        let pipeline = AnalysisPipeline::new(Box::new(llm), Box::new(Arc::clone(&sink)));
        let stages = safety_analysis_stages();

        let outcome = pipeline.run(&stages, complete_input(), BTreeMap::new());

        assert!(!outcome.stages[0].success);
        assert_eq!(outcome.stages[0].payload["quality_score"], 5);
        assert!(outcome.stages[1].success);
        assert_eq!(outcome.metadata.degraded_stages, 1);
        assert_eq!(sink.count_for(&outcome.analysis_id), 4);
    }

    #[test]
    fn comparison_run_enforces_decision_rules() {
        let llm = MockLlmClient::scripted(vec![
            json!({"quality_score": 8, "data_quality": "HIGH", "missing_critical": [], "concerns": []})
                .to_string(),
            json!({"hazards": [{
                "label": "crane lift over occupied area",
                "probability": 0.5,
                "consequence": "Fatal",
                "risk_score": 82,
                "inadequate_controls": ["no exclusion zone"]
            }]})
            .to_string(),
            json!({
                "decision": "go",
                "reasoning": "Looks fine to me.",
                "required_actions": [],
                "work_restrictions": [],
                "monitoring_requirements": []
            })
            .to_string(),
            "Comparison report.".to_string(),
        ]);
        let sink = Arc::new(MemoryAuditSink::new());
        let pipeline = AnalysisPipeline::new(Box::new(llm), Box::new(Arc::clone(&sink)));
        let stages = comparison_stages();

        let mut reference = BTreeMap::new();
        reference.insert(
            REF_BASELINE.to_string(),
            json!({"risk_score": 40, "hazards": ["slips"]}),
        );

        let outcome = pipeline.run(&stages, complete_input(), reference);

        let decision = outcome
            .stages
            .iter()
            .find(|s| s.stage_id == "dispatch_decision")
            .unwrap();
        assert_eq!(decision.payload["decision"], "no_go");
        assert_eq!(decision.payload["risk_score_delta"], 42);
        assert_eq!(sink.count_for(&outcome.analysis_id), 4);
    }

    #[test]
    fn emergency_plan_run_produces_scenarios() {
        let llm = MockLlmClient::scripted(vec![
            json!({"quality_score": 8, "data_quality": "HIGH", "missing_critical": [], "concerns": []})
                .to_string(),
            json!({"scenarios": [{
                "scenario": "Roof fire",
                "alarm_signal": "Fire alarm",
                "response_steps": ["Evacuate", "Muster"],
                "assembly_point": "Gate B",
                "notification_chain": ["Supervisor"],
                "external_contacts": ["Fire brigade"]
            }]})
            .to_string(),
            "Emergency plan report.".to_string(),
        ]);
        let sink = Arc::new(MemoryAuditSink::new());
        let pipeline = AnalysisPipeline::new(Box::new(llm), Box::new(Arc::clone(&sink)));
        let stages = emergency_plan_stages();

        let outcome = pipeline.run(&stages, complete_input(), BTreeMap::new());

        assert_eq!(outcome.stages.len(), 3);
        let plan = &outcome.stages[1];
        assert_eq!(plan.payload["scenarios"][0]["scenario"], "Roof fire");
        assert_eq!(outcome.report, "Emergency plan report.");
    }

    #[test]
    fn panicking_contract_is_contained() {
        struct PanickingStage;
        impl StageContract for PanickingStage {
            fn id(&self) -> &'static str {
                "panicking"
            }
            fn name(&self) -> &'static str {
                "Panicking"
            }
            fn kind(&self) -> crate::pipeline::stage::StageKind {
                crate::pipeline::stage::StageKind::Validation
            }
            fn options(&self) -> crate::pipeline::ollama::GenerationOptions {
                crate::pipeline::ollama::GenerationOptions::new(0.1, 64)
            }
            fn build_prompt(&self, _ctx: &PipelineContext) -> String {
                panic!("contract bug")
            }
            fn fallback(&self, _ctx: &PipelineContext) -> Value {
                json!({})
            }
        }

        let sink = Arc::new(MemoryAuditSink::new());
        let pipeline = AnalysisPipeline::new(
            Box::new(MockLlmClient::new("{}")),
            Box::new(Arc::clone(&sink)),
        );
        let stages: Vec<Box<dyn StageContract>> = vec![Box::new(PanickingStage)];

        let outcome = pipeline.run(&stages, json!({}), BTreeMap::new());

        assert!(outcome.stages.is_empty());
        assert!(outcome.report.contains("internal error"));
    }

    #[test]
    fn context_threading_passes_stage_output_forward() {
        let llm = scripted_safety_run();
        let sink = Arc::new(MemoryAuditSink::new());
        let pipeline = AnalysisPipeline::new(Box::new(llm), Box::new(Arc::clone(&sink)));
        let stages = safety_analysis_stages();

        let outcome = pipeline.run(&stages, complete_input(), BTreeMap::new());

        // The forecast stage consumed the hazard the risk stage produced.
        let forecast = outcome
            .stages
            .iter()
            .find(|s| s.stage_id == "incident_forecast")
            .unwrap();
        assert_eq!(
            forecast.payload["incident"],
            "Worker falls from roof edge"
        );
    }
}
