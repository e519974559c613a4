use std::env;

/// Application-level constants
pub const APP_NAME: &str = "Averon";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default Ollama endpoint for local inference.
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Default request timeout for model calls (seconds).
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Preferred analysis models in order of preference.
pub const ANALYSIS_MODELS: &[&str] = &[
    "llama3.1",
    "llama3.1:8b",
    "llama3:8b",
    "llama3:latest",
];

/// Default log filter when RUST_LOG is not set.
pub fn default_log_filter() -> &'static str {
    "averon=info"
}

/// Ollama base URL, overridable via `AVERON_OLLAMA_URL`.
pub fn ollama_url() -> String {
    env::var("AVERON_OLLAMA_URL").unwrap_or_else(|_| DEFAULT_OLLAMA_URL.to_string())
}

/// Model name, overridable via `AVERON_MODEL`.
pub fn model_name() -> String {
    env::var("AVERON_MODEL").unwrap_or_else(|_| ANALYSIS_MODELS[0].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_name_is_averon() {
        assert_eq!(APP_NAME, "Averon");
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn default_url_is_local() {
        assert!(DEFAULT_OLLAMA_URL.contains("localhost"));
    }

    #[test]
    fn model_preference_order() {
        assert_eq!(ANALYSIS_MODELS[0], "llama3.1");
        assert!(ANALYSIS_MODELS.len() >= 3);
    }
}
