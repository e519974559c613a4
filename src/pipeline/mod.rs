pub mod context;
pub mod extract;
pub mod ollama;
pub mod orchestrator;
pub mod presets;
pub mod prompts;
pub mod runner;
pub mod sanitize;
pub mod stage;
pub mod stages;

pub use context::*;
pub use extract::*;
pub use ollama::*;
pub use orchestrator::*;
pub use runner::*;
pub use stage::*;

use thiserror::Error;

/// Transport-level failure from the model service.
///
/// The adapter performs no retries; every variant propagates to the stage
/// runner, which substitutes the stage fallback.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model service is not reachable at {0}")]
    Connection(String),

    #[error("Model service returned error (status {status}): {body}")]
    Service { status: u16, body: String },

    #[error("Model returned an empty response")]
    EmptyResponse,

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Response decoding error: {0}")]
    ResponseDecoding(String),

    #[error("No compatible analysis model available")]
    NoModelAvailable,
}
