use super::{http_client, transport_error, GenerationBackend};
use crate::config::{GenerationParams, LlmProvider, ModelConfig};
use async_trait::async_trait;
use tac_core::{GenerationError, TacResult};
use tracing::{debug, info};

/// OpenAI-compatible API backend.
///
/// Works with OpenAI, OpenRouter, Groq, Ollama, and any other provider
/// that implements the OpenAI chat completions API.
pub struct OpenAiBackend {
    config: ModelConfig,
    http: reqwest::Client,
}

impl OpenAiBackend {
    /// Build a client for the chat completions endpoint.
    pub fn new(config: ModelConfig) -> TacResult<Self> {
        let http = http_client(config.request_timeout_secs)?;
        Ok(Self { config, http })
    }

    fn build_body(&self, prompt: &str, params: &GenerationParams) -> serde_json::Value {
        serde_json::json!({
            "model": params.model.as_deref().unwrap_or(&self.config.model_id),
            "max_tokens": params.max_tokens.unwrap_or(self.config.max_tokens),
            "temperature": params.temperature.unwrap_or(self.config.temperature),
            "messages": [
                { "role": "system", "content": params.system_or_default() },
                { "role": "user", "content": prompt },
            ],
        })
    }

    fn add_provider_headers(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json");

        // OpenRouter requires extra headers
        if matches!(self.config.provider, LlmProvider::OpenRouter) {
            request
                .header("HTTP-Referer", "https://github.com/tac-cluster/tac")
                .header("X-Title", "TAC")
        } else {
            request
        }
    }
}

#[async_trait]
impl GenerationBackend for OpenAiBackend {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, GenerationError> {
        let url = format!("{}/v1/chat/completions", self.config.base_url());
        let body = self.build_body(prompt, params);
        let provider = self.config.provider.to_string();

        debug!(provider = %provider, url = %url, "Sending chat completion request");

        let resp = self
            .add_provider_headers(self.http.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(&provider, e))?;

        let status = resp.status();
        if !status.is_success() {
            let error_body = resp
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(GenerationError::from_status(
                status.as_u16(),
                format!("{provider} API error {status}: {error_body}"),
            ));
        }

        let resp_body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| transport_error(&provider, e))?;

        let text = parse_openai_response(&resp_body)?;
        if let Some(total) = resp_body["usage"]["total_tokens"].as_u64() {
            info!(provider = %provider, tokens = total, "Generation successful");
        }
        Ok(text)
    }

    fn provider(&self) -> &str {
        match self.config.provider {
            LlmProvider::OpenRouter => "openrouter",
            LlmProvider::Groq => "groq",
            _ => "openai",
        }
    }
}

fn parse_openai_response(body: &serde_json::Value) -> Result<String, GenerationError> {
    body["choices"][0]["message"]["content"]
        .as_str()
        .map(|s| s.trim().to_string())
        .ok_or_else(|| {
            GenerationError::permanent(format!("no message content in response: {body}"))
        })
}
