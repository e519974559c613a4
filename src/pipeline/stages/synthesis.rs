//! Synthesis stage — the final narrative report.
//!
//! The only prose stage: no JSON is required, so it "succeeds" as long as
//! the model says anything at all. When it cannot, the fallback assembles a
//! report from the structured payloads already in the context, with no
//! further model call. Either way the pipeline ends with a non-empty report.

use serde_json::{json, Value};

use crate::pipeline::context::PipelineContext;
use crate::pipeline::extract::strip_wrappers;
use crate::pipeline::ollama::GenerationOptions;
use crate::pipeline::prompts::build_synthesis_prompt;
use crate::pipeline::stage::{StageContract, StageFailure, StageKind};

use super::decision::DECISION_STAGE_ID;
use super::emergency::PLAN_STAGE_ID;
use super::prediction::FORECAST_STAGE_ID;
use super::risk::{parse_hazards, RISK_STAGE_ID};
use super::validation::VALIDATION_STAGE_ID;

pub const SYNTHESIS_STAGE_ID: &str = "report_synthesis";

/// Final stage of every pipeline.
pub struct SynthesisStage;

impl StageContract for SynthesisStage {
    fn id(&self) -> &'static str {
        SYNTHESIS_STAGE_ID
    }

    fn name(&self) -> &'static str {
        "Report synthesis"
    }

    fn kind(&self) -> StageKind {
        StageKind::Synthesis
    }

    fn options(&self) -> GenerationOptions {
        GenerationOptions::new(0.4, 2048)
    }

    fn build_prompt(&self, ctx: &PipelineContext) -> String {
        let payloads: Vec<(&str, &Value)> = ctx.stages().collect();
        build_synthesis_prompt(&payloads)
    }

    fn fallback(&self, ctx: &PipelineContext) -> Value {
        json!({ "report": template_report(ctx) })
    }

    /// Prose is the schema here: any non-empty narrative passes.
    fn evaluate(&self, raw: &str, _ctx: &PipelineContext) -> Result<Value, StageFailure> {
        let text = strip_wrappers(raw);
        if text.is_empty() {
            return Err(StageFailure::SchemaValidation(
                "empty narrative response".to_string(),
            ));
        }
        Ok(json!({ "report": text }))
    }
}

/// Assemble a report purely from prior stage payloads.
fn template_report(ctx: &PipelineContext) -> String {
    let mut report = String::from(
        "SITE SAFETY ANALYSIS REPORT\n\
         (Assembled from structured stage results; the narrative model was unavailable.)\n",
    );

    if let Some(validation) = ctx.stage(VALIDATION_STAGE_ID) {
        let score = validation
            .get("quality_score")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let quality = validation
            .get("data_quality")
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN");
        report.push_str(&format!(
            "\nData quality: {quality} (score {score}/10).\n"
        ));
        if let Some(missing) = validation.get("missing_critical").and_then(Value::as_array) {
            if !missing.is_empty() {
                let fields: Vec<&str> =
                    missing.iter().filter_map(Value::as_str).collect();
                report.push_str(&format!("Missing critical fields: {}.\n", fields.join(", ")));
            }
        }
    }

    if let Some(risk) = ctx.stage(RISK_STAGE_ID) {
        let hazards = parse_hazards(risk);
        if !hazards.is_empty() {
            report.push_str("\nRanked hazards:\n");
            for hazard in hazards.iter().take(5) {
                report.push_str(&format!(
                    "- {} (risk score {}, {:?}, probability {:.2})\n",
                    hazard.label, hazard.risk_score, hazard.consequence, hazard.probability
                ));
            }
        }
    }

    if let Some(forecast) = ctx.stage(FORECAST_STAGE_ID) {
        let incident = forecast
            .get("incident")
            .and_then(Value::as_str)
            .unwrap_or("unavailable");
        let confidence = forecast
            .get("confidence")
            .and_then(Value::as_str)
            .unwrap_or("LOW");
        report.push_str(&format!(
            "\nProjected incident: {incident} (confidence {confidence}).\n"
        ));
        if let Some(intervention) = forecast.get("intervention").and_then(Value::as_str) {
            report.push_str(&format!("Recommended intervention: {intervention}\n"));
        }
    }

    if let Some(plan) = ctx.stage(PLAN_STAGE_ID) {
        if let Some(scenarios) = plan.get("scenarios").and_then(Value::as_array) {
            let names: Vec<&str> = scenarios
                .iter()
                .filter_map(|s| s.get("scenario").and_then(Value::as_str))
                .collect();
            if !names.is_empty() {
                report.push_str(&format!(
                    "\nEmergency scenarios planned: {}.\n",
                    names.join(", ")
                ));
            }
        }
    }

    if let Some(decision) = ctx.stage(DECISION_STAGE_ID) {
        let verdict = decision
            .get("decision")
            .and_then(Value::as_str)
            .unwrap_or("conditional");
        report.push_str(&format!(
            "\nDispatch decision: {}.\n",
            verdict.to_uppercase()
        ));
        if let Some(reasoning) = decision.get("reasoning").and_then(Value::as_str) {
            report.push_str(&format!("Reasoning: {reasoning}\n"));
        }
    }

    report.push_str(
        "\nThis report was generated in degraded mode. Treat unverified sections with caution \
         and have a competent person review the findings before relying on them.\n",
    );
    report
}
