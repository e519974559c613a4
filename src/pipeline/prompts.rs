//! Prompt builders for every pipeline stage.
//!
//! Each builder renders the running context into a fenced-JSON instruction
//! block. The schema exemplars here are the single source of truth for what
//! the contracts expect back from the model.

use serde_json::Value;

/// System prompt shared by every analysis call.
pub const ANALYST_SYSTEM_PROMPT: &str = r#"
You are a workplace safety analysis assistant. Your ONLY role is to analyze
site and questionnaire data and produce structured assessments.

RULES — ABSOLUTE, NO EXCEPTIONS:
1. Base every statement on the data provided. NEVER invent site conditions.
2. When data is missing or ambiguous, say so explicitly in the output.
3. When a JSON structure is requested, output it first, wrapped in ```json``` fences.
4. Keep free-text sections factual and free of speculation about people.
5. Never downplay a hazard. When uncertain between two severities, pick the higher.
"#;

/// Render a JSON value for prompt embedding.
fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Validation stage: score data completeness and quality.
pub fn build_validation_prompt(
    input: &Value,
    missing_critical: &[String],
    no_answer: &[String],
) -> String {
    format!(
        r#"Assess the completeness and quality of the following site questionnaire data.

<site_data>
{input}
</site_data>

A deterministic pre-scan found these gaps:
- missing critical fields: {missing:?}
- fields answered with a non-answer: {no_answer:?}

Score the data 1-10: 10 = no gaps; 7-9 = minor gaps; 4-6 = significant gaps
in critical fields; 1-3 = insufficient to proceed. List every concern that
would weaken a risk assessment built on this data.

```json
{{
  "quality_score": 0,
  "data_quality": "HIGH | MEDIUM | LOW",
  "missing_critical": ["field", "..."],
  "concerns": ["concern", "..."]
}}
```"#,
        input = pretty(input),
        missing = missing_critical,
        no_answer = no_answer,
    )
}

/// Risk-assessment stage: enumerate and score hazards.
pub fn build_risk_prompt(
    input: &Value,
    validation: Option<&Value>,
    industry_stats: Option<&Value>,
    weather: Option<&Value>,
    baseline: Option<&Value>,
) -> String {
    let mut sections = String::new();
    if let Some(v) = validation {
        sections.push_str(&format!(
            "\nData-quality assessment of this input:\n{}\n",
            pretty(v)
        ));
    }
    if let Some(s) = industry_stats {
        sections.push_str(&format!("\nIndustry incident statistics:\n{}\n", pretty(s)));
    }
    if let Some(w) = weather {
        sections.push_str(&format!("\nCurrent weather snapshot:\n{}\n", pretty(w)));
    }
    if let Some(b) = baseline {
        sections.push_str(&format!(
            "\nBaseline assessment to compare against:\n{}\n",
            pretty(b)
        ));
    }

    format!(
        r#"Identify and score the hazards present in the following site data.

<site_data>
{input}
</site_data>
{sections}
For each hazard give: probability of occurrence (0.0-1.0), worst plausible
consequence (Minor, Serious, Critical, or Fatal), an overall risk score
(1-100), and the controls named in the data that are inadequate for it.
Order hazards from highest to lowest risk score.

```json
{{
  "hazards": [
    {{
      "label": "short hazard name",
      "probability": 0.0,
      "consequence": "Minor | Serious | Critical | Fatal",
      "risk_score": 0,
      "inadequate_controls": ["control", "..."]
    }}
  ]
}}
```"#,
        input = pretty(input),
        sections = sections,
    )
}

/// Incident-forecast stage: project the top hazard into a causal chain.
pub fn build_forecast_prompt(top_hazard: &Value) -> String {
    format!(
        r#"Project how the following hazard most plausibly becomes an incident.

<top_hazard>
{hazard}
</top_hazard>

Name the incident, rate your confidence (HIGH, MEDIUM, or LOW), and lay out
the causal chain through exactly these five phases, in order: initiating
event, first defense failure, human factor, point of no return, injury
mechanism. Give 3-5 observable leading indicators a supervisor could watch
for, and the single intervention that best breaks the chain.

```json
{{
  "incident": "named incident",
  "confidence": "HIGH | MEDIUM | LOW",
  "causal_chain": [
    {{"phase": "initiating_event", "description": "..."}},
    {{"phase": "first_defense_failure", "description": "..."}},
    {{"phase": "human_factor", "description": "..."}},
    {{"phase": "point_of_no_return", "description": "..."}},
    {{"phase": "injury_mechanism", "description": "..."}}
  ],
  "leading_indicators": ["indicator", "..."],
  "intervention": "the one recommended intervention"
}}
```"#,
        hazard = pretty(top_hazard),
    )
}

/// Emergency-plan stage: scenario-keyed response plans.
pub fn build_plan_prompt(input: &Value, validation: Option<&Value>, weather: Option<&Value>) -> String {
    let mut sections = String::new();
    if let Some(v) = validation {
        sections.push_str(&format!(
            "\nData-quality assessment of this input:\n{}\n",
            pretty(v)
        ));
    }
    if let Some(w) = weather {
        sections.push_str(&format!("\nCurrent weather snapshot:\n{}\n", pretty(w)));
    }

    format!(
        r#"Draft emergency response plans for the credible emergency scenarios at
the following site.

<site_data>
{input}
</site_data>
{sections}
For each scenario give the alarm signal, ordered response steps, the
assembly point, the internal notification chain, and the external contacts
to call. Use only locations, roles, and contacts present in the site data.

```json
{{
  "scenarios": [
    {{
      "scenario": "short scenario name",
      "alarm_signal": "how the alarm is raised",
      "response_steps": ["step", "..."],
      "assembly_point": "where to muster",
      "notification_chain": ["role", "..."],
      "external_contacts": ["contact", "..."]
    }}
  ]
}}
```"#,
        input = pretty(input),
        sections = sections,
    )
}

/// Decision stage: recommend go / no-go / conditional with justification.
pub fn build_decision_prompt(
    hazards: Option<&Value>,
    risk_score: u8,
    risk_score_delta: i64,
    baseline_hazards: Option<&Value>,
) -> String {
    let baseline = baseline_hazards
        .map(pretty)
        .unwrap_or_else(|| "none on record".to_string());

    format!(
        r#"Recommend whether work should proceed, given the updated risk picture.

Current hazard assessment:
{hazards}

Computed top risk score: {risk_score}
Change against the baseline assessment: {delta:+}
Baseline hazards on record: {baseline}

Recommend go, no_go, or conditional, with reasoning. For conditional, name
the required mitigations. Always list work restrictions and monitoring
requirements appropriate to the hazards.

```json
{{
  "decision": "go | no_go | conditional",
  "reasoning": "...",
  "required_actions": ["action", "..."],
  "work_restrictions": ["restriction", "..."],
  "monitoring_requirements": ["requirement", "..."]
}}
```"#,
        hazards = hazards.map(pretty).unwrap_or_else(|| "unavailable".to_string()),
        risk_score = risk_score,
        delta = risk_score_delta,
        baseline = baseline,
    )
}

/// Synthesis stage: the final narrative report over everything so far.
pub fn build_synthesis_prompt(stage_payloads: &[(&str, &Value)]) -> String {
    let mut sections = String::new();
    for (id, payload) in stage_payloads {
        sections.push_str(&format!("\n## {id}\n{}\n", pretty(payload)));
    }

    format!(
        r#"Write the final safety analysis report for site management, based on
the structured findings below. Plain prose, no JSON. Open with the overall
picture, then cover data quality, the ranked hazards, the projected
incident path where present, and close with clear recommended actions.
Keep it under 600 words.

# Structured findings
{sections}"#,
        sections = sections,
    )
}
