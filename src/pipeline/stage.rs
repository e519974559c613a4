//! Stage contract — what one pipeline step promises: a prompt, generation
//! settings, an output schema, and a deterministic fallback.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use super::context::PipelineContext;
use super::extract::{extract_json, ExtractionFailure};
use super::ollama::GenerationOptions;
use super::ModelError;

/// What a stage is for. Recorded with every audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Validation,
    RiskScoring,
    Prediction,
    Planning,
    Decision,
    Synthesis,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::RiskScoring => "risk_scoring",
            Self::Prediction => "prediction",
            Self::Planning => "planning",
            Self::Decision => "decision",
            Self::Synthesis => "synthesis",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a stage's model path could not be trusted.
#[derive(Error, Debug)]
pub enum StageFailure {
    #[error("Model invocation failed: {0}")]
    ModelInvocation(#[from] ModelError),

    #[error("Could not extract structured data: {0}")]
    Extraction(String),

    #[error("Extracted data failed schema validation: {0}")]
    SchemaValidation(String),
}

impl From<ExtractionFailure> for StageFailure {
    fn from(failure: ExtractionFailure) -> Self {
        Self::Extraction(failure.reason)
    }
}

/// One step of the pipeline.
///
/// A contract owns everything stage-specific: the prompt built from the
/// running context, the sampling settings, the schema the model output must
/// satisfy, the deterministic scoring applied on top, and the fallback
/// payload substituted when the model path fails. The fallback must satisfy
/// the same schema as a real payload — downstream stages never see a hole.
pub trait StageContract: Send + Sync {
    fn id(&self) -> &'static str;

    fn name(&self) -> &'static str;

    fn kind(&self) -> StageKind;

    fn options(&self) -> GenerationOptions;

    fn build_prompt(&self, ctx: &PipelineContext) -> String;

    /// Top-level keys the extracted payload must carry (none may be null).
    fn required_fields(&self) -> &'static [&'static str] {
        &[]
    }

    /// Deserialize, clamp, and score the extracted value. An error here is
    /// treated like any other failure: the runner substitutes `fallback`.
    fn refine(&self, value: Value, ctx: &PipelineContext) -> Result<Value, StageFailure> {
        let _ = ctx;
        Ok(value)
    }

    /// Schema-valid payload used when the model path cannot be trusted.
    fn fallback(&self, ctx: &PipelineContext) -> Value;

    /// Turn raw model text into this stage's payload.
    ///
    /// Default: JSON extraction, required-field check, then `refine`.
    /// Narrative stages override this to accept prose.
    fn evaluate(&self, raw: &str, ctx: &PipelineContext) -> Result<Value, StageFailure> {
        let value = extract_json(raw)?;
        ensure_required(&value, self.required_fields())?;
        self.refine(value, ctx)
    }
}

/// Required-field presence check: the payload must be a JSON object carrying
/// every named key with a non-null value.
pub fn ensure_required(value: &Value, fields: &[&str]) -> Result<(), StageFailure> {
    let obj = value.as_object().ok_or_else(|| {
        StageFailure::SchemaValidation("payload is not a JSON object".to_string())
    })?;
    for field in fields {
        match obj.get(*field) {
            None | Some(Value::Null) => {
                return Err(StageFailure::SchemaValidation(format!(
                    "missing required field `{field}`"
                )))
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Outcome of one stage. The payload is always present — real when the
/// model path succeeded, the contract fallback otherwise.
#[derive(Debug, Clone, Serialize)]
pub struct StageResult {
    pub stage_id: String,
    pub stage_name: String,
    pub kind: StageKind,
    pub payload: Value,
    pub raw_model_text: String,
    pub success: bool,
    pub error: Option<String>,
    pub execution_time_ms: u64,
}
