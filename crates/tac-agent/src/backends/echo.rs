use super::GenerationBackend;
use crate::config::GenerationParams;
use async_trait::async_trait;
use tac_core::GenerationError;

/// Offline backend that reflects the prompt back.
///
/// Used for local runs and demos when no provider is configured.
pub struct EchoBackend {
    model: String,
}

impl EchoBackend {
    /// Backend that reports `model` as its model name.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

impl Default for EchoBackend {
    fn default() -> Self {
        Self::new("echo")
    }
}

#[async_trait]
impl GenerationBackend for EchoBackend {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, GenerationError> {
        if prompt.trim().is_empty() {
            return Err(GenerationError::permanent("empty prompt"));
        }
        let model = params.model.as_deref().unwrap_or(&self.model);
        Ok(format!("[{model}] {}", prompt.trim()))
    }

    fn provider(&self) -> &str {
        "echo"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_reflects_prompt() {
        let backend = EchoBackend::default();
        let out = backend
            .generate("  plan this ", &GenerationParams::default())
            .await
            .unwrap();
        assert_eq!(out, "[echo] plan this");
    }

    #[tokio::test]
    async fn test_echo_rejects_empty_prompt() {
        let err = EchoBackend::default()
            .generate("   ", &GenerationParams::default())
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }
}
