//! Intake validation stage — how trustworthy is the submitted data?
//!
//! A deterministic gap survey runs over the questionnaire payload before the
//! model is asked anything. The survey feeds the prompt, and afterwards it
//! clamps the model's score into the band the gaps dictate, so a hallucinated
//! score can never escape its band.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::pipeline::context::PipelineContext;
use crate::pipeline::ollama::GenerationOptions;
use crate::pipeline::prompts::build_validation_prompt;
use crate::pipeline::stage::{StageContract, StageFailure, StageKind};

pub const VALIDATION_STAGE_ID: &str = "intake_validation";

/// Checklist fields a risk assessment cannot do without.
pub const CRITICAL_FIELDS: &[&str] = &[
    "site_name",
    "work_description",
    "crew_size",
    "hazard_controls",
    "emergency_contact",
    "ppe_inventory",
];

/// Responses that carry no information.
const NO_ANSWER_VALUES: &[&str] = &["", "n/a", "na", "none", "no answer", "unknown", "-"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataQuality {
    High,
    Medium,
    Low,
}

/// Validation stage payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub quality_score: u8,
    pub data_quality: DataQuality,
    pub missing_critical: Vec<String>,
    pub concerns: Vec<String>,
}

/// Deterministic pre-scan of the questionnaire payload.
#[derive(Debug, Clone, Default)]
pub struct GapSurvey {
    /// Critical fields that are absent, null, or answered with a non-answer.
    pub missing_critical: Vec<String>,
    /// Non-critical fields answered with a non-answer.
    pub no_answer: Vec<String>,
}

/// Score band dictated by the gap survey.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreBand {
    /// No gaps at all.
    Full,
    /// Non-answers outside the critical set.
    Minor,
    /// Gaps in some critical fields.
    Significant,
    /// Every critical field is a gap.
    Insufficient,
}

impl GapSurvey {
    pub fn band(&self) -> ScoreBand {
        let critical_gaps = self.missing_critical.len();
        if critical_gaps == 0 && self.no_answer.is_empty() {
            ScoreBand::Full
        } else if critical_gaps == 0 {
            ScoreBand::Minor
        } else if critical_gaps < CRITICAL_FIELDS.len() {
            ScoreBand::Significant
        } else {
            ScoreBand::Insufficient
        }
    }
}

impl ScoreBand {
    /// Clamp a model-proposed score into this band.
    pub fn clamp_score(self, score: u8) -> u8 {
        match self {
            Self::Full => score.clamp(8, 10),
            Self::Minor => score.clamp(7, 9),
            Self::Significant => score.clamp(4, 6),
            Self::Insufficient => score.clamp(1, 3),
        }
    }

    pub fn data_quality(self) -> DataQuality {
        match self {
            Self::Full => DataQuality::High,
            Self::Minor | Self::Significant => DataQuality::Medium,
            Self::Insufficient => DataQuality::Low,
        }
    }
}

fn is_no_answer(text: &str) -> bool {
    let normalized = text.trim().to_lowercase();
    NO_ANSWER_VALUES.contains(&normalized.as_str())
}

/// Survey the payload for missing critical fields and non-answers.
pub fn survey_gaps(input: &Value) -> GapSurvey {
    let Some(obj) = input.as_object() else {
        // A non-object payload has no usable fields at all.
        return GapSurvey {
            missing_critical: CRITICAL_FIELDS.iter().map(|f| f.to_string()).collect(),
            no_answer: Vec::new(),
        };
    };

    let mut survey = GapSurvey::default();

    for field in CRITICAL_FIELDS {
        match obj.get(*field) {
            None | Some(Value::Null) => survey.missing_critical.push(field.to_string()),
            Some(Value::String(s)) if is_no_answer(s) => {
                survey.missing_critical.push(field.to_string())
            }
            Some(_) => {}
        }
    }

    for (key, value) in obj {
        if CRITICAL_FIELDS.contains(&key.as_str()) {
            continue;
        }
        if let Value::String(s) = value {
            if is_no_answer(s) {
                survey.no_answer.push(key.clone());
            }
        }
    }

    survey
}

/// First stage of every pipeline: is the data worth analyzing?
pub struct ValidationStage;

impl StageContract for ValidationStage {
    fn id(&self) -> &'static str {
        VALIDATION_STAGE_ID
    }

    fn name(&self) -> &'static str {
        "Intake validation"
    }

    fn kind(&self) -> StageKind {
        StageKind::Validation
    }

    fn options(&self) -> GenerationOptions {
        GenerationOptions::new(0.1, 512)
    }

    fn build_prompt(&self, ctx: &PipelineContext) -> String {
        let survey = survey_gaps(ctx.input());
        build_validation_prompt(ctx.input(), &survey.missing_critical, &survey.no_answer)
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["quality_score", "data_quality", "missing_critical", "concerns"]
    }

    fn refine(&self, value: Value, ctx: &PipelineContext) -> Result<Value, StageFailure> {
        let proposed = value
            .get("quality_score")
            .and_then(Value::as_f64)
            .ok_or_else(|| {
                StageFailure::SchemaValidation("quality_score is not a number".to_string())
            })?;
        let proposed = proposed.round().clamp(1.0, 10.0) as u8;

        let survey = survey_gaps(ctx.input());
        let band = survey.band();

        // Model-reported gaps merge with the deterministic survey.
        let mut missing_critical = survey.missing_critical.clone();
        if let Some(reported) = value.get("missing_critical").and_then(Value::as_array) {
            for item in reported.iter().filter_map(Value::as_str) {
                if !missing_critical.iter().any(|m| m == item) {
                    missing_critical.push(item.to_string());
                }
            }
        }

        let concerns = value
            .get("concerns")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let report = ValidationReport {
            quality_score: band.clamp_score(proposed),
            data_quality: band.data_quality(),
            missing_critical,
            concerns,
        };

        serde_json::to_value(&report).map_err(|e| StageFailure::SchemaValidation(e.to_string()))
    }

    fn fallback(&self, ctx: &PipelineContext) -> Value {
        let survey = survey_gaps(ctx.input());
        json!({
            "quality_score": 5,
            "data_quality": "MEDIUM",
            "missing_critical": survey.missing_critical,
            "concerns": [
                "The validation stage itself failed; this score is a default, not a verified assessment."
            ]
        })
    }
}
