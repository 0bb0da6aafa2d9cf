use super::{http_client, transport_error, GenerationBackend};
use crate::config::{GenerationParams, ModelConfig};
use async_trait::async_trait;
use serde::Serialize;
use tac_core::{GenerationError, TacResult};
use tracing::{debug, info};

/// Claude (Anthropic) API backend.
pub struct ClaudeBackend {
    config: ModelConfig,
    http: reqwest::Client,
}

impl ClaudeBackend {
    /// Build a client for the Messages API.
    pub fn new(config: ModelConfig) -> TacResult<Self> {
        let http = http_client(config.request_timeout_secs)?;
        Ok(Self { config, http })
    }
}

#[async_trait]
impl GenerationBackend for ClaudeBackend {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, GenerationError> {
        let url = format!("{}/v1/messages", self.config.base_url());

        let messages = vec![ClaudeMessage {
            role: "user",
            content: prompt,
        }];
        let body = serde_json::json!({
            "model": params.model.as_deref().unwrap_or(&self.config.model_id),
            "max_tokens": params.max_tokens.unwrap_or(self.config.max_tokens),
            "temperature": params.temperature.unwrap_or(self.config.temperature),
            "system": params.system_or_default(),
            "messages": messages,
        });

        debug!(url = %url, "Sending Claude messages request");

        let resp = self
            .http
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("claude", e))?;

        let status = resp.status();
        if !status.is_success() {
            let error_body = resp
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(GenerationError::from_status(
                status.as_u16(),
                format!("Claude API error {status}: {error_body}"),
            ));
        }

        let resp_body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| transport_error("claude", e))?;

        let text = parse_claude_response(&resp_body)?;
        info!(
            input_tokens = resp_body["usage"]["input_tokens"].as_u64().unwrap_or(0),
            output_tokens = resp_body["usage"]["output_tokens"].as_u64().unwrap_or(0),
            "Claude generation successful"
        );
        Ok(text)
    }

    fn provider(&self) -> &str {
        "claude"
    }
}

#[derive(Serialize)]
struct ClaudeMessage<'a> {
    role: &'a str,
    content: &'a str,
}

fn parse_claude_response(body: &serde_json::Value) -> Result<String, GenerationError> {
    let blocks = body["content"].as_array().ok_or_else(|| {
        GenerationError::permanent(format!("no content blocks in Claude response: {body}"))
    })?;

    let text: Vec<&str> = blocks
        .iter()
        .filter(|b| b["type"] == "text")
        .filter_map(|b| b["text"].as_str())
        .collect();

    if text.is_empty() {
        return Err(GenerationError::permanent(
            "Claude response contained no text blocks",
        ));
    }
    Ok(text.join("").trim().to_string())
}
