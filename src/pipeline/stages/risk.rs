//! Risk-assessment stage — ranked hazards with probability, consequence,
//! and an overall risk score.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::pipeline::context::PipelineContext;
use crate::pipeline::ollama::GenerationOptions;
use crate::pipeline::presets::{REF_BASELINE, REF_INDUSTRY_STATS, REF_WEATHER};
use crate::pipeline::prompts::build_risk_prompt;
use crate::pipeline::stage::{StageContract, StageFailure, StageKind};

use super::validation::VALIDATION_STAGE_ID;

pub const RISK_STAGE_ID: &str = "risk_assessment";

/// Worst plausible outcome of a hazard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Consequence {
    Minor,
    Serious,
    Critical,
    Fatal,
}

impl Consequence {
    /// Critical and Fatal hazards gate the dispatch decision.
    pub fn is_high_severity(self) -> bool {
        matches!(self, Self::Critical | Self::Fatal)
    }
}

/// One scored hazard. The assessment list is ordered by `risk_score`
/// descending; the first entry drives the prediction stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hazard {
    pub label: String,
    pub probability: f64,
    pub consequence: Consequence,
    pub risk_score: u8,
    #[serde(default)]
    pub inadequate_controls: Vec<String>,
}

/// Loosely-typed hazard as the model writes it, before clamping.
#[derive(Deserialize)]
struct RawHazard {
    label: String,
    probability: f64,
    consequence: Consequence,
    risk_score: f64,
    #[serde(default)]
    inadequate_controls: Vec<String>,
}

impl From<RawHazard> for Hazard {
    fn from(raw: RawHazard) -> Self {
        Self {
            label: raw.label,
            probability: raw.probability.clamp(0.0, 1.0),
            consequence: raw.consequence,
            risk_score: raw.risk_score.round().clamp(1.0, 100.0) as u8,
            inadequate_controls: raw.inadequate_controls,
        }
    }
}

/// Parse a hazard list leniently — malformed entries are skipped.
pub(crate) fn parse_hazards(value: &Value) -> Vec<Hazard> {
    value
        .get("hazards")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|v| serde_json::from_value::<RawHazard>(v.clone()).ok())
                .map(Hazard::from)
                .collect()
        })
        .unwrap_or_default()
}

/// The highest-scored hazard recorded by the risk stage, if any.
pub fn top_hazard(ctx: &PipelineContext) -> Option<Hazard> {
    ctx.stage(RISK_STAGE_ID)
        .map(parse_hazards)
        .and_then(|hazards| hazards.into_iter().next())
}

/// Second stage: what can hurt someone here, and how badly?
pub struct RiskAssessmentStage;

impl StageContract for RiskAssessmentStage {
    fn id(&self) -> &'static str {
        RISK_STAGE_ID
    }

    fn name(&self) -> &'static str {
        "Risk assessment"
    }

    fn kind(&self) -> StageKind {
        StageKind::RiskScoring
    }

    fn options(&self) -> GenerationOptions {
        GenerationOptions::new(0.3, 1024)
    }

    fn build_prompt(&self, ctx: &PipelineContext) -> String {
        build_risk_prompt(
            ctx.input(),
            ctx.stage(VALIDATION_STAGE_ID),
            ctx.reference(REF_INDUSTRY_STATS),
            ctx.reference(REF_WEATHER),
            ctx.reference(REF_BASELINE),
        )
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["hazards"]
    }

    fn refine(&self, value: Value, _ctx: &PipelineContext) -> Result<Value, StageFailure> {
        let mut hazards = parse_hazards(&value);
        if hazards.is_empty() {
            return Err(StageFailure::SchemaValidation(
                "no valid hazard entries in assessment".to_string(),
            ));
        }

        // The ranking is load-bearing: the top entry drives the forecast.
        hazards.sort_by(|a, b| b.risk_score.cmp(&a.risk_score));

        Ok(json!({ "hazards": hazards }))
    }

    fn fallback(&self, _ctx: &PipelineContext) -> Value {
        json!({
            "hazards": [{
                "label": "General site hazard (assessment unavailable)",
                "probability": 0.5,
                "consequence": "Serious",
                "risk_score": 50,
                "inadequate_controls": []
            }]
        })
    }
}
