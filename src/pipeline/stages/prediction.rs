//! Incident-forecast stage — project the top hazard into a causal chain.
//!
//! The forecast is the most speculative stage in the pipeline, so its
//! fallback is deliberately loud: confidence is forced LOW and every chain
//! entry says the prediction is unavailable. A fallback path can never be
//! mistaken for a confident forecast.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::pipeline::context::PipelineContext;
use crate::pipeline::ollama::GenerationOptions;
use crate::pipeline::prompts::build_forecast_prompt;
use crate::pipeline::stage::{StageContract, StageFailure, StageKind};

use super::risk::top_hazard;

pub const FORECAST_STAGE_ID: &str = "incident_forecast";

/// Leading indicators required in a usable forecast.
const MIN_INDICATORS: usize = 3;
const MAX_INDICATORS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// The five phases of an incident trajectory, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CausalPhase {
    InitiatingEvent,
    FirstDefenseFailure,
    HumanFactor,
    PointOfNoReturn,
    InjuryMechanism,
}

impl CausalPhase {
    pub fn all() -> &'static [CausalPhase] {
        &[
            Self::InitiatingEvent,
            Self::FirstDefenseFailure,
            Self::HumanFactor,
            Self::PointOfNoReturn,
            Self::InjuryMechanism,
        ]
    }

    fn rank(self) -> u8 {
        match self {
            Self::InitiatingEvent => 0,
            Self::FirstDefenseFailure => 1,
            Self::HumanFactor => 2,
            Self::PointOfNoReturn => 3,
            Self::InjuryMechanism => 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CausalLink {
    pub phase: CausalPhase,
    pub description: String,
}

/// Forecast stage payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentForecast {
    pub incident: String,
    pub confidence: Confidence,
    pub causal_chain: Vec<CausalLink>,
    pub leading_indicators: Vec<String>,
    pub intervention: String,
}

/// Third stage: how does the top hazard most plausibly become an incident?
pub struct ForecastStage;

impl StageContract for ForecastStage {
    fn id(&self) -> &'static str {
        FORECAST_STAGE_ID
    }

    fn name(&self) -> &'static str {
        "Incident forecast"
    }

    fn kind(&self) -> StageKind {
        StageKind::Prediction
    }

    fn options(&self) -> GenerationOptions {
        GenerationOptions::new(0.7, 1024)
    }

    fn build_prompt(&self, ctx: &PipelineContext) -> String {
        let hazard = top_hazard(ctx)
            .and_then(|h| serde_json::to_value(h).ok())
            .unwrap_or_else(|| json!({"label": "unspecified site hazard"}));
        build_forecast_prompt(&hazard)
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &[
            "incident",
            "confidence",
            "causal_chain",
            "leading_indicators",
            "intervention",
        ]
    }

    fn refine(&self, value: Value, _ctx: &PipelineContext) -> Result<Value, StageFailure> {
        let incident = value
            .get("incident")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| StageFailure::SchemaValidation("incident name is empty".to_string()))?
            .to_string();

        let confidence: Confidence = value
            .get("confidence")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .ok_or_else(|| {
                StageFailure::SchemaValidation("confidence is not HIGH/MEDIUM/LOW".to_string())
            })?;

        // Chain entries parse leniently, then sort into canonical phase order.
        let mut causal_chain: Vec<CausalLink> = value
            .get("causal_chain")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| serde_json::from_value(v.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();
        if causal_chain.is_empty() {
            return Err(StageFailure::SchemaValidation(
                "causal chain has no valid entries".to_string(),
            ));
        }
        causal_chain.sort_by_key(|link| link.phase.rank());

        let mut leading_indicators: Vec<String> = value
            .get("leading_indicators")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if leading_indicators.len() < MIN_INDICATORS {
            return Err(StageFailure::SchemaValidation(format!(
                "expected at least {MIN_INDICATORS} leading indicators, got {}",
                leading_indicators.len()
            )));
        }
        leading_indicators.truncate(MAX_INDICATORS);

        let intervention = value
            .get("intervention")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                StageFailure::SchemaValidation("intervention is empty".to_string())
            })?
            .to_string();

        let forecast = IncidentForecast {
            incident,
            confidence,
            causal_chain,
            leading_indicators,
            intervention,
        };
        Ok(json!(forecast))
    }

    fn fallback(&self, ctx: &PipelineContext) -> Value {
        let hazard_label = top_hazard(ctx)
            .map(|h| h.label)
            .unwrap_or_else(|| "the top-ranked hazard".to_string());

        let causal_chain: Vec<CausalLink> = CausalPhase::all()
            .iter()
            .map(|phase| CausalLink {
                phase: *phase,
                description: "Prediction unavailable for this phase.".to_string(),
            })
            .collect();

        json!({
            "incident": "Prediction unavailable",
            "confidence": "LOW",
            "causal_chain": causal_chain,
            "leading_indicators": [
                format!("Any near-miss involving {hazard_label}"),
                "Supervisor reports of improvised work methods",
                "Controls found disabled or bypassed during walkdowns"
            ],
            "intervention": "Hold a manual review of the top hazard before work proceeds."
        })
    }
}
