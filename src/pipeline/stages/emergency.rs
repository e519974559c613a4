//! Emergency-plan stage — scenario-keyed response plans for the site.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::pipeline::context::PipelineContext;
use crate::pipeline::ollama::GenerationOptions;
use crate::pipeline::presets::REF_WEATHER;
use crate::pipeline::prompts::build_plan_prompt;
use crate::pipeline::stage::{StageContract, StageFailure, StageKind};

use super::validation::VALIDATION_STAGE_ID;

pub const PLAN_STAGE_ID: &str = "emergency_plan";

/// One emergency scenario and its response plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyScenario {
    pub scenario: String,
    pub alarm_signal: String,
    pub response_steps: Vec<String>,
    pub assembly_point: String,
    #[serde(default)]
    pub notification_chain: Vec<String>,
    #[serde(default)]
    pub external_contacts: Vec<String>,
}

fn parse_scenarios(value: &Value) -> Vec<EmergencyScenario> {
    value
        .get("scenarios")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|v| serde_json::from_value::<EmergencyScenario>(v.clone()).ok())
                .filter(|s| !s.scenario.trim().is_empty() && !s.response_steps.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Emergency-plan generator stage.
pub struct PlanStage;

impl StageContract for PlanStage {
    fn id(&self) -> &'static str {
        PLAN_STAGE_ID
    }

    fn name(&self) -> &'static str {
        "Emergency plan"
    }

    fn kind(&self) -> StageKind {
        StageKind::Planning
    }

    fn options(&self) -> GenerationOptions {
        GenerationOptions::new(0.5, 1024)
    }

    fn build_prompt(&self, ctx: &PipelineContext) -> String {
        build_plan_prompt(
            ctx.input(),
            ctx.stage(VALIDATION_STAGE_ID),
            ctx.reference(REF_WEATHER),
        )
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["scenarios"]
    }

    fn refine(&self, value: Value, _ctx: &PipelineContext) -> Result<Value, StageFailure> {
        let scenarios = parse_scenarios(&value);
        if scenarios.is_empty() {
            return Err(StageFailure::SchemaValidation(
                "no usable emergency scenarios in plan".to_string(),
            ));
        }
        Ok(json!({ "scenarios": scenarios }))
    }

    fn fallback(&self, _ctx: &PipelineContext) -> Value {
        json!({
            "scenarios": [{
                "scenario": "General evacuation",
                "alarm_signal": "Continuous siren or three long horn blasts",
                "response_steps": [
                    "Stop work and make the work area safe if possible",
                    "Proceed to the designated assembly point by the nearest safe route",
                    "Report to the supervisor for the head count",
                    "Do not re-enter until the all-clear is given"
                ],
                "assembly_point": "Designated site assembly point per the site induction",
                "notification_chain": ["Supervisor", "Site manager"],
                "external_contacts": ["Local emergency services"]
            }]
        })
    }
}
