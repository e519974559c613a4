//! Dispatch-decision stage — go / no-go / conditional over the updated risk
//! picture.
//!
//! The thresholds here are fixed business rules. They run after extraction
//! no matter what the model said, and again on the fallback path, so the
//! recorded decision always reflects the rules, never model prose.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::pipeline::context::PipelineContext;
use crate::pipeline::ollama::GenerationOptions;
use crate::pipeline::presets::REF_BASELINE;
use crate::pipeline::prompts::build_decision_prompt;
use crate::pipeline::stage::{StageContract, StageFailure, StageKind};

use super::risk::{parse_hazards, Hazard, RISK_STAGE_ID};

pub const DECISION_STAGE_ID: &str = "dispatch_decision";

/// Decision thresholds. Changing these silently would alter safety-relevant
/// behavior; they are kept verbatim from the operating rules.
const NO_GO_SCORE: u8 = 75;
const NO_GO_DELTA: i64 = 15;
const GO_SCORE: u8 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Go,
    NoGo,
    Conditional,
}

impl Decision {
    /// Ordering by restrictiveness, for monotonicity checks.
    pub fn restrictiveness(self) -> u8 {
        match self {
            Self::Go => 0,
            Self::Conditional => 1,
            Self::NoGo => 2,
        }
    }
}

/// Decision stage payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchDecision {
    pub decision: Decision,
    pub reasoning: String,
    pub required_actions: Vec<String>,
    pub work_restrictions: Vec<String>,
    pub monitoring_requirements: Vec<String>,
    pub risk_score: u8,
    pub risk_score_delta: i64,
}

/// The computed inputs the threshold rules run on.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskPicture {
    pub risk_score: u8,
    pub risk_score_delta: i64,
    pub new_high_severity: bool,
}

impl RiskPicture {
    /// Derive the picture from the risk stage output and the baseline
    /// reference. A hazard is "new" when its label is absent from the
    /// baseline hazard list; with no baseline list, every high-severity
    /// hazard counts as new.
    pub fn from_context(ctx: &PipelineContext) -> Self {
        let hazards: Vec<Hazard> = ctx
            .stage(RISK_STAGE_ID)
            .map(parse_hazards)
            .unwrap_or_default();

        let risk_score = hazards.first().map(|h| h.risk_score).unwrap_or(50);

        let baseline = ctx.reference(REF_BASELINE);
        let baseline_score = baseline
            .and_then(|b| b.get("risk_score"))
            .and_then(Value::as_i64);
        let risk_score_delta = baseline_score
            .map(|b| i64::from(risk_score) - b)
            .unwrap_or(0);

        let baseline_labels: Vec<String> = baseline
            .and_then(|b| b.get("hazards"))
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_lowercase)
                    .collect()
            })
            .unwrap_or_default();

        let new_high_severity = hazards.iter().any(|h| {
            h.consequence.is_high_severity()
                && !baseline_labels.contains(&h.label.to_lowercase())
        });

        Self {
            risk_score,
            risk_score_delta,
            new_high_severity,
        }
    }
}

/// Apply the threshold rules. Monotonic: raising the score or the delta can
/// only move the decision towards no_go, never away from it.
pub fn assess(picture: &RiskPicture) -> Decision {
    if picture.risk_score > NO_GO_SCORE || picture.risk_score_delta > NO_GO_DELTA {
        return Decision::NoGo;
    }
    if picture.new_high_severity {
        return Decision::Conditional;
    }
    if picture.risk_score < GO_SCORE {
        return Decision::Go;
    }
    Decision::Conditional
}

fn string_list(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Comparison-pipeline stage: should the updated work proceed?
pub struct DecisionStage;

impl StageContract for DecisionStage {
    fn id(&self) -> &'static str {
        DECISION_STAGE_ID
    }

    fn name(&self) -> &'static str {
        "Dispatch decision"
    }

    fn kind(&self) -> StageKind {
        StageKind::Decision
    }

    fn options(&self) -> GenerationOptions {
        GenerationOptions::new(0.2, 512)
    }

    fn build_prompt(&self, ctx: &PipelineContext) -> String {
        let picture = RiskPicture::from_context(ctx);
        build_decision_prompt(
            ctx.stage(RISK_STAGE_ID),
            picture.risk_score,
            picture.risk_score_delta,
            ctx.reference(REF_BASELINE).and_then(|b| b.get("hazards")),
        )
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["decision", "reasoning"]
    }

    fn refine(&self, value: Value, ctx: &PipelineContext) -> Result<Value, StageFailure> {
        let picture = RiskPicture::from_context(ctx);
        let ruled = assess(&picture);

        let suggested: Option<Decision> = value
            .get("decision")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok());

        let mut reasoning = value
            .get("reasoning")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| StageFailure::SchemaValidation("reasoning is empty".to_string()))?
            .to_string();

        if suggested != Some(ruled) {
            tracing::warn!(
                suggested = ?suggested,
                ruled = ?ruled,
                risk_score = picture.risk_score,
                delta = picture.risk_score_delta,
                "Model decision overridden by threshold rules"
            );
            reasoning.push_str(" [Decision set by threshold rules.]");
        }

        let decision = DispatchDecision {
            decision: ruled,
            reasoning,
            required_actions: string_list(&value, "required_actions"),
            work_restrictions: string_list(&value, "work_restrictions"),
            monitoring_requirements: string_list(&value, "monitoring_requirements"),
            risk_score: picture.risk_score,
            risk_score_delta: picture.risk_score_delta,
        };
        Ok(json!(decision))
    }

    fn fallback(&self, ctx: &PipelineContext) -> Value {
        let picture = RiskPicture::from_context(ctx);
        let ruled = assess(&picture);

        let required_actions: Vec<&str> = match ruled {
            Decision::NoGo => vec!["Stop work until the risk picture is reassessed"],
            Decision::Conditional => {
                vec!["Mitigate newly identified high-severity hazards before proceeding"]
            }
            Decision::Go => vec![],
        };

        json!({
            "decision": ruled,
            "reasoning": "Decision derived from threshold rules; the model assessment was unavailable.",
            "required_actions": required_actions,
            "work_restrictions": ["No work outside the assessed scope"],
            "monitoring_requirements": ["Supervisor walkdown at the start of each shift"],
            "risk_score": picture.risk_score,
            "risk_score_delta": picture.risk_score_delta
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ollama::{FailingLlmClient, MockLlmClient};
    use crate::pipeline::runner::run_stage;
    use std::collections::BTreeMap;

    fn picture(score: u8, delta: i64, new_high: bool) -> RiskPicture {
        RiskPicture {
            risk_score: score,
            risk_score_delta: delta,
            new_high_severity: new_high,
        }
    }

    fn ctx_with_risk(score: u8, consequence: &str, baseline_score: i64) -> PipelineContext {
        let mut reference = BTreeMap::new();
        reference.insert(
            REF_BASELINE.to_string(),
            json!({"risk_score": baseline_score, "hazards": ["slips"]}),
        );
        let mut ctx = PipelineContext::new(json!({}), reference);
        ctx.push_stage(
            RISK_STAGE_ID,
            json!({"hazards": [{
                "label": "fall from roof edge",
                "probability": 0.6,
                "consequence": consequence,
                "risk_score": score,
                "inadequate_controls": []
            }]}),
        );
        ctx
    }

    #[test]
    fn high_score_is_no_go() {
        assert_eq!(assess(&picture(76, 0, false)), Decision::NoGo);
        assert_eq!(assess(&picture(100, 0, false)), Decision::NoGo);
    }

    #[test]
    fn large_delta_is_no_go() {
        assert_eq!(assess(&picture(40, 16, false)), Decision::NoGo);
    }

    #[test]
    fn new_high_severity_is_conditional() {
        assert_eq!(assess(&picture(40, 0, true)), Decision::Conditional);
    }

    #[test]
    fn low_score_without_high_severity_is_go() {
        assert_eq!(assess(&picture(49, 0, false)), Decision::Go);
        assert_eq!(assess(&picture(1, -10, false)), Decision::Go);
    }

    #[test]
    fn middle_band_is_conditional() {
        assert_eq!(assess(&picture(50, 0, false)), Decision::Conditional);
        assert_eq!(assess(&picture(75, 15, false)), Decision::Conditional);
    }

    #[test]
    fn decision_is_monotonic_in_delta() {
        for score in [10u8, 40, 60, 74, 76, 90] {
            for new_high in [false, true] {
                let mut prev = 0;
                for delta in -20..=40 {
                    let d = assess(&picture(score, delta, new_high));
                    assert!(
                        d.restrictiveness() >= prev,
                        "decision relaxed at score={score} delta={delta}"
                    );
                    prev = d.restrictiveness();
                }
            }
        }
    }

    #[test]
    fn decision_is_monotonic_in_score() {
        for delta in [-10i64, 0, 10, 20] {
            for new_high in [false, true] {
                let mut prev = 0;
                for score in 1..=100u8 {
                    let d = assess(&picture(score, delta, new_high));
                    assert!(
                        d.restrictiveness() >= prev,
                        "decision relaxed at score={score} delta={delta}"
                    );
                    prev = d.restrictiveness();
                }
            }
        }
    }

    #[test]
    fn risk_picture_computes_delta_against_baseline() {
        let ctx = ctx_with_risk(82, "Fatal", 40);
        let p = RiskPicture::from_context(&ctx);
        assert_eq!(p.risk_score, 82);
        assert_eq!(p.risk_score_delta, 42);
        assert!(p.new_high_severity);
    }

    #[test]
    fn baseline_hazard_is_not_new() {
        let mut reference = BTreeMap::new();
        reference.insert(
            REF_BASELINE.to_string(),
            json!({"risk_score": 60, "hazards": ["Fall from roof edge"]}),
        );
        let mut ctx = PipelineContext::new(json!({}), reference);
        ctx.push_stage(
            RISK_STAGE_ID,
            json!({"hazards": [{
                "label": "fall from roof edge",
                "probability": 0.5,
                "consequence": "Critical",
                "risk_score": 60,
                "inadequate_controls": []
            }]}),
        );
        let p = RiskPicture::from_context(&ctx);
        assert!(!p.new_high_severity, "baseline hazards are not new");
    }

    #[test]
    fn score_rule_overrides_model_go() {
        // Scenario: baseline 40, update pushes the score to 82 — no_go
        // regardless of what the model recommends.
        let response = json!({
            "decision": "go",
            "reasoning": "Conditions look acceptable to me.",
            "required_actions": [],
            "work_restrictions": [],
            "monitoring_requirements": []
        })
        .to_string();
        let llm = MockLlmClient::new(&response);
        let result = run_stage(&llm, &DecisionStage, &ctx_with_risk(82, "Fatal", 40));

        assert!(result.success);
        assert_eq!(result.payload["decision"], "no_go");
        assert_eq!(result.payload["risk_score"], 82);
        assert_eq!(result.payload["risk_score_delta"], 42);
        assert!(result.payload["reasoning"]
            .as_str()
            .unwrap()
            .contains("threshold rules"));
    }

    #[test]
    fn agreeing_model_decision_is_kept_unannotated() {
        let response = json!({
            "decision": "no_go",
            "reasoning": "Score exceeds the stop threshold.",
            "required_actions": ["Stop work"],
            "work_restrictions": [],
            "monitoring_requirements": []
        })
        .to_string();
        let llm = MockLlmClient::new(&response);
        let result = run_stage(&llm, &DecisionStage, &ctx_with_risk(82, "Fatal", 40));

        assert_eq!(result.payload["decision"], "no_go");
        assert!(!result.payload["reasoning"]
            .as_str()
            .unwrap()
            .contains("threshold rules.]"));
    }

    #[test]
    fn fallback_still_applies_threshold_rules() {
        let result = run_stage(&FailingLlmClient, &DecisionStage, &ctx_with_risk(82, "Fatal", 40));

        assert!(!result.success);
        assert_eq!(result.payload["decision"], "no_go");
        assert_eq!(
            result.payload["required_actions"][0],
            "Stop work until the risk picture is reassessed"
        );
    }

    #[test]
    fn fallback_can_still_say_go() {
        let result = run_stage(&FailingLlmClient, &DecisionStage, &ctx_with_risk(30, "Minor", 30));

        assert_eq!(result.payload["decision"], "go");
        assert!(result.payload["required_actions"].as_array().unwrap().is_empty());
    }

    #[test]
    fn decision_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Decision::NoGo).unwrap(), "\"no_go\"");
        assert_eq!(serde_json::to_string(&Decision::Go).unwrap(), "\"go\"");
    }
}
