/// Anthropic Messages API.
pub mod claude;
/// Offline backend for tests and dry runs.
pub mod echo;
/// Google Gemini.
pub mod gemini;
/// OpenAI-compatible chat completions (OpenAI, OpenRouter, Groq).
pub mod openai;

use crate::config::{GenerationParams, LlmProvider, ModelConfig};
use async_trait::async_trait;
use std::sync::Arc;
use tac_core::{GenerationError, TacError, TacResult};
use tracing::info;

/// Trait for generation providers.
///
/// Each provider (OpenAI, Claude, Gemini, Groq, Echo, ...) implements this trait to
/// handle API communication. Implementations must be safe to call from many
/// workers at once; the orchestrator does not serialize calls beyond its pool
/// ceiling.
///
/// To add a new provider:
/// 1. Create a new module in `backends/`
/// 2. Implement `GenerationBackend` for your struct
/// 3. Add the variant to `LlmProvider` in `config.rs`
/// 4. Wire it up in [`build_backend`]
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generate text for a prompt.
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, GenerationError>;

    /// Provider name, for logs and status views.
    fn provider(&self) -> &str;
}

/// Resolve the configured provider into a concrete backend.
///
/// Called once at startup. Remote providers without an API key are a
/// configuration error.
pub fn build_backend(config: &ModelConfig) -> TacResult<Arc<dyn GenerationBackend>> {
    let mut config = config.clone();
    if config.provider.requires_api_key() {
        let key = config.resolved_api_key().ok_or_else(|| {
            TacError::Config(format!(
                "no API key for provider '{}': set llm.api_key or {}",
                config.provider,
                config.provider.api_key_env()
            ))
        })?;
        config.api_key = key;
    }

    info!(
        provider = %config.provider,
        model = %config.model_id,
        "Initializing generation backend"
    );

    let backend: Arc<dyn GenerationBackend> = match config.provider {
        LlmProvider::Claude => Arc::new(claude::ClaudeBackend::new(config)?),
        LlmProvider::OpenAi | LlmProvider::OpenRouter | LlmProvider::Groq => {
            Arc::new(openai::OpenAiBackend::new(config)?)
        }
        LlmProvider::Google => Arc::new(gemini::GeminiBackend::new(config)?),
        LlmProvider::Echo => Arc::new(echo::EchoBackend::new(config.model_id)),
    };
    Ok(backend)
}

/// Map a transport-level `reqwest` failure to a generation error.
///
/// Anything that happened before a response arrived (connect, timeout,
/// interrupted body) is transient.
pub(crate) fn transport_error(provider: &str, err: reqwest::Error) -> GenerationError {
    if err.is_decode() {
        GenerationError::permanent(format!("{provider} returned an unreadable body: {err}"))
    } else {
        GenerationError::transient(format!("{provider} request failed: {err}"))
    }
}

pub(crate) fn http_client(timeout_secs: u64) -> TacResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| TacError::Http(format!("failed to build HTTP client: {e}")))
}
