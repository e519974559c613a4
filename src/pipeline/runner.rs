//! Stage runner — the fallback boundary.
//!
//! Everything that can go wrong on the model path (invocation error,
//! extraction failure, schema rejection) is absorbed here and replaced by
//! the contract's fallback payload. Nothing propagates past this function.

use std::time::Instant;

use super::context::PipelineContext;
use super::ollama::LlmClient;
use super::sanitize::sanitize_for_prompt;
use super::stage::{StageContract, StageFailure, StageResult};

/// Maximum characters of a rejected response echoed into the log.
const LOG_SNIPPET_LEN: usize = 200;

/// Execute one stage against the running context.
///
/// Always returns a `StageResult` with a schema-valid payload; `success` is
/// false when the payload is the contract fallback.
pub fn run_stage(
    llm: &dyn LlmClient,
    contract: &dyn StageContract,
    ctx: &PipelineContext,
) -> StageResult {
    let start = Instant::now();
    let prompt = sanitize_for_prompt(&contract.build_prompt(ctx));
    let options = contract.options();

    let (payload, raw_model_text, success, error) = match llm.generate(&prompt, &options) {
        Ok(raw) => match contract.evaluate(&raw, ctx) {
            Ok(payload) => (payload, raw, true, None),
            Err(failure) => {
                tracing::warn!(
                    stage = contract.id(),
                    error = %failure,
                    raw_snippet = %snippet(&raw),
                    "Stage output rejected, substituting fallback"
                );
                (contract.fallback(ctx), raw, false, Some(failure.to_string()))
            }
        },
        Err(e) => {
            let failure = StageFailure::ModelInvocation(e);
            tracing::warn!(
                stage = contract.id(),
                error = %failure,
                "Model call failed, substituting fallback"
            );
            (
                contract.fallback(ctx),
                String::new(),
                false,
                Some(failure.to_string()),
            )
        }
    };

    StageResult {
        stage_id: contract.id().to_string(),
        stage_name: contract.name().to_string(),
        kind: contract.kind(),
        payload,
        raw_model_text,
        success,
        error,
        execution_time_ms: start.elapsed().as_millis() as u64,
    }
}

fn snippet(raw: &str) -> String {
    let mut s: String = raw.chars().take(LOG_SNIPPET_LEN).collect();
    if raw.chars().count() > LOG_SNIPPET_LEN {
        s.push('…');
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ollama::{FailingLlmClient, GenerationOptions, MockLlmClient};
    use crate::pipeline::stage::StageKind;
    use serde_json::{json, Value};

    /// Minimal contract for exercising the runner in isolation.
    struct ProbeStage;

    impl StageContract for ProbeStage {
        fn id(&self) -> &'static str {
            "probe"
        }

        fn name(&self) -> &'static str {
            "Probe"
        }

        fn kind(&self) -> StageKind {
            StageKind::Validation
        }

        fn options(&self) -> GenerationOptions {
            GenerationOptions::new(0.1, 128)
        }

        fn build_prompt(&self, _ctx: &PipelineContext) -> String {
            "probe prompt".to_string()
        }

        fn required_fields(&self) -> &'static [&'static str] {
            &["score"]
        }

        fn fallback(&self, _ctx: &PipelineContext) -> Value {
            json!({"score": 0, "fallback": true})
        }
    }

    #[test]
    fn successful_stage_carries_model_payload() {
        let llm = MockLlmClient::new(r#"{"score": 7}"#);
        let result = run_stage(&llm, &ProbeStage, &PipelineContext::default());

        assert!(result.success);
        assert!(result.error.is_none());
        assert_eq!(result.payload["score"], 7);
        assert_eq!(result.stage_id, "probe");
        assert!(result.raw_model_text.contains("score"));
    }

    #[test]
    fn invocation_failure_substitutes_fallback() {
        let result = run_stage(&FailingLlmClient, &ProbeStage, &PipelineContext::default());

        assert!(!result.success);
        assert_eq!(result.payload["fallback"], true);
        assert!(result.error.as_deref().unwrap().contains("Model invocation"));
        assert!(result.raw_model_text.is_empty());
    }

    #[test]
    fn extraction_failure_substitutes_fallback() {
        let llm = MockLlmClient::new("no json at all, just prose");
        let result = run_stage(&llm, &ProbeStage, &PipelineContext::default());

        assert!(!result.success);
        assert_eq!(result.payload["fallback"], true);
        assert!(result
            .error
            .as_deref()
            .unwrap()
            .contains("Could not extract"));
        // The raw response is preserved for diagnosis
        assert!(result.raw_model_text.contains("prose"));
    }

    #[test]
    fn schema_failure_substitutes_fallback() {
        // Parses as JSON but lacks the required `score` field
        let llm = MockLlmClient::new(r#"{"wrong_field": 1}"#);
        let result = run_stage(&llm, &ProbeStage, &PipelineContext::default());

        assert!(!result.success);
        assert_eq!(result.payload["fallback"], true);
        assert!(result.error.as_deref().unwrap().contains("schema validation"));
    }

    #[test]
    fn execution_time_is_recorded() {
        let llm = MockLlmClient::new(r#"{"score": 7}"#);
        let result = run_stage(&llm, &ProbeStage, &PipelineContext::default());
        assert!(result.execution_time_ms < 5_000);
    }
}
