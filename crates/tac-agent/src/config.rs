use serde::{Deserialize, Serialize};

/// Supported generation providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Anthropic Messages API.
    #[serde(alias = "anthropic")]
    Claude,
    /// OpenAI chat completions API.
    OpenAi,
    /// OpenRouter, OpenAI-compatible.
    OpenRouter,
    /// Groq cloud inference, OpenAI-compatible.
    Groq,
    /// Google Gemini `generateContent` API.
    #[serde(alias = "gemini")]
    Google,
    /// Offline backend that reflects the prompt. No API key needed.
    Echo,
}

impl LlmProvider {
    /// Environment variable consulted when no API key is configured.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            LlmProvider::Claude => "ANTHROPIC_API_KEY",
            LlmProvider::OpenAi => "OPENAI_API_KEY",
            LlmProvider::OpenRouter => "OPENROUTER_API_KEY",
            LlmProvider::Groq => "GROQ_API_KEY",
            LlmProvider::Google => "GOOGLE_API_KEY",
            LlmProvider::Echo => "ECHO_API_KEY",
        }
    }

    /// Whether this provider talks to a remote API and needs a key.
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, LlmProvider::Echo)
    }
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmProvider::Claude => write!(f, "claude"),
            LlmProvider::OpenAi => write!(f, "openai"),
            LlmProvider::OpenRouter => write!(f, "openrouter"),
            LlmProvider::Groq => write!(f, "groq"),
            LlmProvider::Google => write!(f, "google"),
            LlmProvider::Echo => write!(f, "echo"),
        }
    }
}

/// Provider selection and default model settings, the `[llm]` config section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Which API to call.
    pub provider: LlmProvider,
    /// Model name sent with every request unless a call overrides it.
    pub model_id: String,
    /// Empty means "read it from the provider's environment variable".
    #[serde(default)]
    pub api_key: String,
    /// Overrides the provider's default endpoint.
    pub api_base_url: Option<String>,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Output token cap per call.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// HTTP timeout for a single generation request.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_request_timeout() -> u64 {
    120
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Echo,
            model_id: "echo".to_string(),
            api_key: String::new(),
            api_base_url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl ModelConfig {
    /// Endpoint root: `api_base_url`, else the provider default.
    pub fn base_url(&self) -> &str {
        if let Some(url) = &self.api_base_url {
            url
        } else {
            match self.provider {
                LlmProvider::Claude => "https://api.anthropic.com",
                LlmProvider::OpenAi => "https://api.openai.com",
                LlmProvider::OpenRouter => "https://openrouter.ai/api",
                LlmProvider::Groq => "https://api.groq.com/openai",
                LlmProvider::Google => "https://generativelanguage.googleapis.com",
                LlmProvider::Echo => "local://echo",
            }
        }
    }

    /// The configured key, or the provider's environment variable.
    pub fn resolved_api_key(&self) -> Option<String> {
        if !self.api_key.is_empty() {
            return Some(self.api_key.clone());
        }
        std::env::var(self.provider.api_key_env())
            .ok()
            .filter(|k| !k.is_empty())
    }
}

/// Per-call generation overrides. Unset fields fall back to [`ModelConfig`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Replaces the default system prompt.
    pub system_prompt: Option<String>,
    /// Replaces the configured model.
    pub model: Option<String>,
    /// Output token cap.
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
}

impl GenerationParams {
    /// Set the system prompt.
    pub fn with_system(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    /// Cap the output length.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// System prompt to send, defaulting to a generic assistant persona.
    pub fn system_or_default(&self) -> &str {
        self.system_prompt
            .as_deref()
            .unwrap_or("You are a helpful assistant.")
    }
}
