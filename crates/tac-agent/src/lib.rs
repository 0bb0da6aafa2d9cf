//! Generation backends for TAC workers.
//!
//! A generation backend turns a prompt into text. Workers call it through the
//! [`GenerationBackend`] trait and never see which provider is behind it; the
//! provider is chosen once at startup from [`ModelConfig`] by
//! [`build_backend`].
//!
//! # Main types
//!
//! - [`GenerationBackend`]: Provider-agnostic text generation interface.
//! - [`ModelConfig`] / [`LlmProvider`]: Provider selection and model settings.
//! - [`GenerationParams`]: Per-call overrides (system prompt, model, limits).
//! - [`OpenAiBackend`], [`ClaudeBackend`], [`GeminiBackend`], [`EchoBackend`]: Concrete providers.

/// Provider backends and the backend registry.
pub mod backends;
/// Provider and model configuration.
pub mod config;

pub use backends::claude::ClaudeBackend;
pub use backends::echo::EchoBackend;
pub use backends::gemini::GeminiBackend;
pub use backends::openai::OpenAiBackend;
pub use backends::{build_backend, GenerationBackend};
pub use config::{GenerationParams, LlmProvider, ModelConfig};
