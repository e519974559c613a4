//! The three analysis pipelines, assembled from stage contracts.

use super::stage::StageContract;
use super::stages::{
    DecisionStage, ForecastStage, PlanStage, RiskAssessmentStage, SynthesisStage,
    ValidationStage,
};

/// Reference data keys understood by the stage contracts.
pub const REF_WEATHER: &str = "weather";
pub const REF_INDUSTRY_STATS: &str = "industry_stats";
/// Baseline assessment for the comparison pipeline:
/// `{ "risk_score": <1-100>, "hazards": ["label", ...] }`.
pub const REF_BASELINE: &str = "baseline";

/// Full safety analysis: validate → score risks → forecast → report.
pub fn safety_analysis_stages() -> Vec<Box<dyn StageContract>> {
    vec![
        Box::new(ValidationStage),
        Box::new(RiskAssessmentStage),
        Box::new(ForecastStage),
        Box::new(SynthesisStage),
    ]
}

/// Emergency-plan generation: validate → plan → report.
pub fn emergency_plan_stages() -> Vec<Box<dyn StageContract>> {
    vec![
        Box::new(ValidationStage),
        Box::new(PlanStage),
        Box::new(SynthesisStage),
    ]
}

/// Baseline-vs-update comparison: validate → re-score → decide → report.
pub fn comparison_stages() -> Vec<Box<dyn StageContract>> {
    vec![
        Box::new(ValidationStage),
        Box::new(RiskAssessmentStage),
        Box::new(DecisionStage),
        Box::new(SynthesisStage),
    ]
}
