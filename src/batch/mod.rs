//! Batch jobs — slower, paced uses of the model client outside the pipeline.

pub mod backfill;
pub mod pacing;

pub use backfill::*;
pub use pacing::*;
