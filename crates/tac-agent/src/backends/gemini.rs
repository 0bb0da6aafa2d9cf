use super::{http_client, transport_error, GenerationBackend};
use crate::config::{GenerationParams, ModelConfig};
use async_trait::async_trait;
use tac_core::{GenerationError, TacResult};
use tracing::{debug, info, warn};

/// Google Gemini backend over the REST `generateContent` endpoint.
pub struct GeminiBackend {
    config: ModelConfig,
    http: reqwest::Client,
}

impl GeminiBackend {
    /// Build a client for `generateContent`.
    pub fn new(config: ModelConfig) -> TacResult<Self> {
        let http = http_client(config.request_timeout_secs)?;
        Ok(Self { config, http })
    }

    fn build_body(&self, prompt: &str, params: &GenerationParams) -> serde_json::Value {
        serde_json::json!({
            "systemInstruction": { "parts": [{ "text": params.system_or_default() }] },
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "maxOutputTokens": params.max_tokens.unwrap_or(self.config.max_tokens),
                "temperature": params.temperature.unwrap_or(self.config.temperature),
            },
        })
    }
}

#[async_trait]
impl GenerationBackend for GeminiBackend {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, GenerationError> {
        let model = params.model.as_deref().unwrap_or(&self.config.model_id);
        let url = format!(
            "{}/v1beta/models/{model}:generateContent",
            self.config.base_url()
        );
        let body = self.build_body(prompt, params);

        debug!(url = %url, "Sending Gemini generateContent request");

        let resp = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("google", e))?;

        let status = resp.status();
        if !status.is_success() {
            let error_body = resp
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(GenerationError::from_status(
                status.as_u16(),
                format!("Gemini API error {status}: {error_body}"),
            ));
        }

        let resp_body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| transport_error("google", e))?;

        let text = parse_gemini_response(&resp_body)?;
        info!(
            tokens = resp_body["usageMetadata"]["totalTokenCount"].as_u64().unwrap_or(0),
            "Gemini generation successful"
        );
        Ok(text)
    }

    fn provider(&self) -> &str {
        "google"
    }
}

/// Join the text parts of the first candidate.
///
/// A response without candidates was blocked by safety filtering; retrying
/// the same prompt would be blocked again.
fn parse_gemini_response(body: &serde_json::Value) -> Result<String, GenerationError> {
    let Some(candidate) = body["candidates"].as_array().and_then(|c| c.first()) else {
        let reason = body["promptFeedback"]["blockReason"]
            .as_str()
            .unwrap_or("unknown");
        warn!(reason, "Gemini generation blocked");
        return Err(GenerationError::permanent(format!(
            "Gemini generation blocked (reason: {reason})"
        )));
    };

    let text: String = candidate["content"]["parts"]
        .as_array()
        .map(|parts| parts.iter().filter_map(|p| p["text"].as_str()).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(GenerationError::permanent(
            "Gemini response contained no text parts",
        ));
    }
    Ok(text.trim().to_string())
}
