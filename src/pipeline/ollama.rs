//! Model invocation adapter — a thin, retry-free transport to local Ollama.
//!
//! This is a pure boundary: one blocking HTTP call per invocation, no
//! retries, no fallback. Recovery belongs to the stage runner, which owns
//! the per-stage fallback payloads.

use serde::{Deserialize, Serialize};

use super::prompts::ANALYST_SYSTEM_PROMPT;
use super::ModelError;
use crate::config;

/// Per-stage generation settings.
///
/// Hoisted out of the call sites so every stage contract carries its own
/// explicit temperature/token budget instead of inline literals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl GenerationOptions {
    pub const fn new(temperature: f32, max_tokens: u32) -> Self {
        Self {
            temperature,
            max_tokens,
        }
    }
}

/// Generative model client abstraction (allows mocking).
pub trait LlmClient {
    /// Single blocking completion call. No retries; failures propagate.
    fn generate(&self, prompt: &str, options: &GenerationOptions)
        -> Result<String, ModelError>;

    fn list_models(&self) -> Result<Vec<String>, ModelError>;

    fn is_model_available(&self, model: &str) -> Result<bool, ModelError> {
        let models = self.list_models()?;
        Ok(models.iter().any(|m| m.starts_with(model)))
    }
}

/// Ollama HTTP client for local inference.
pub struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl OllamaClient {
    /// Create a client pointing at an Ollama instance.
    pub fn new(base_url: &str, model: &str, timeout_secs: u64) -> Result<Self, ModelError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ModelError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client,
            timeout_secs,
        })
    }

    /// Client configured from the environment (`AVERON_OLLAMA_URL`,
    /// `AVERON_MODEL`) with the default timeout.
    pub fn from_env() -> Result<Self, ModelError> {
        Self::new(
            &config::ollama_url(),
            &config::model_name(),
            config::DEFAULT_TIMEOUT_SECS,
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Resolve the best available analysis model.
    pub fn find_best_model(&self) -> Result<String, ModelError> {
        let available = self.list_models()?;
        for preferred in config::ANALYSIS_MODELS {
            if available.iter().any(|m| m.starts_with(preferred)) {
                return Ok(preferred.to_string());
            }
        }
        Err(ModelError::NoModelAvailable)
    }
}

/// Request body for Ollama /api/generate
#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
    options: RequestOptions,
}

/// Stage-specific sampling options forwarded to Ollama.
#[derive(Serialize)]
struct RequestOptions {
    temperature: f32,
    num_predict: u32,
}

/// Response body from Ollama /api/generate
#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Response body from Ollama /api/tags
#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<ModelTag>,
}

#[derive(Deserialize)]
struct ModelTag {
    name: String,
}

impl LlmClient for OllamaClient {
    fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, ModelError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            system: ANALYST_SYSTEM_PROMPT,
            stream: false,
            options: RequestOptions {
                temperature: options.temperature,
                num_predict: options.max_tokens,
            },
        };

        let response = self.client.post(&url).json(&body).send().map_err(|e| {
            if e.is_connect() {
                ModelError::Connection(self.base_url.clone())
            } else if e.is_timeout() {
                ModelError::HttpClient(format!(
                    "Request timed out after {}s",
                    self.timeout_secs
                ))
            } else {
                ModelError::HttpClient(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ModelError::Service {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .map_err(|e| ModelError::ResponseDecoding(e.to_string()))?;

        if parsed.response.trim().is_empty() {
            return Err(ModelError::EmptyResponse);
        }

        Ok(parsed.response)
    }

    fn list_models(&self) -> Result<Vec<String>, ModelError> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self.client.get(&url).send().map_err(|e| {
            if e.is_connect() {
                ModelError::Connection(self.base_url.clone())
            } else {
                ModelError::HttpClient(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ModelError::Service {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TagsResponse = response
            .json()
            .map_err(|e| ModelError::ResponseDecoding(e.to_string()))?;

        Ok(parsed.models.into_iter().map(|m| m.name).collect())
    }
}

/// Mock client for tests — replays scripted responses in order.
///
/// When the script runs out, the last response repeats, so single-response
/// mocks work for multi-stage runs.
pub struct MockLlmClient {
    script: std::sync::Mutex<Vec<String>>,
    last: String,
    prompts: std::sync::Mutex<Vec<String>>,
}

impl MockLlmClient {
    pub fn new(response: &str) -> Self {
        Self::scripted(vec![response.to_string()])
    }

    pub fn scripted(responses: Vec<String>) -> Self {
        let last = responses.last().cloned().unwrap_or_default();
        let mut script = responses;
        script.reverse(); // pop() from the front of the original order
        Self {
            script: std::sync::Mutex::new(script),
            last,
            prompts: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Prompts this client has seen, in call order.
    pub fn seen_prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl LlmClient for MockLlmClient {
    fn generate(
        &self,
        prompt: &str,
        _options: &GenerationOptions,
    ) -> Result<String, ModelError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        let next = self
            .script
            .lock()
            .ok()
            .and_then(|mut s| s.pop())
            .unwrap_or_else(|| self.last.clone());
        Ok(next)
    }

    fn list_models(&self) -> Result<Vec<String>, ModelError> {
        Ok(vec![config::ANALYSIS_MODELS[0].to_string()])
    }
}

/// Client that simulates a total model outage.
pub struct FailingLlmClient;

impl LlmClient for FailingLlmClient {
    fn generate(
        &self,
        _prompt: &str,
        _options: &GenerationOptions,
    ) -> Result<String, ModelError> {
        Err(ModelError::Connection("http://localhost:11434".to_string()))
    }

    fn list_models(&self) -> Result<Vec<String>, ModelError> {
        Err(ModelError::Connection("http://localhost:11434".to_string()))
    }
}
