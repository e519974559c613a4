//! Search-summary backfill — batch generation over stored analyses.
//!
//! A simpler use of the same model client than the pipeline: one short,
//! low-temperature call per item, paced to respect service limits. A failed
//! item is skipped and the job keeps going; there is no fallback machinery
//! here because nothing downstream depends on a backfilled summary.

use uuid::Uuid;

use super::pacing::Pacer;
use crate::pipeline::ollama::{GenerationOptions, LlmClient};

const BACKFILL_OPTIONS: GenerationOptions = GenerationOptions::new(0.0, 128);

/// One stored analysis needing a searchable summary line.
#[derive(Debug, Clone)]
pub struct BackfillItem {
    pub id: Uuid,
    pub text: String,
}

/// Per-item outcome of a backfill run.
#[derive(Debug, Clone)]
pub struct BackfillOutcome {
    pub item_id: Uuid,
    pub summary: Option<String>,
    pub error: Option<String>,
}

impl BackfillOutcome {
    pub fn succeeded(&self) -> bool {
        self.summary.is_some()
    }
}

/// Generate a one-line keyword summary for each item, with a fixed delay
/// between model calls.
pub fn run_backfill(
    llm: &dyn LlmClient,
    pacer: &Pacer,
    items: &[BackfillItem],
) -> Vec<BackfillOutcome> {
    items
        .iter()
        .map(|item| {
            pacer.pause();

            let prompt = format!(
                "Summarize the following safety analysis in one line of searchable \
                 keywords. Output the line only.\n\n{}",
                item.text
            );

            match llm.generate(&prompt, &BACKFILL_OPTIONS) {
                Ok(summary) => BackfillOutcome {
                    item_id: item.id,
                    summary: Some(summary.trim().to_string()),
                    error: None,
                },
                Err(e) => {
                    tracing::warn!(
                        item = %item.id,
                        error = %e,
                        "Backfill generation failed, skipping item"
                    );
                    BackfillOutcome {
                        item_id: item.id,
                        summary: None,
                        error: Some(e.to_string()),
                    }
                }
            }
        })
        .collect()
}
