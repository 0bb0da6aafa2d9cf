//! Worker variants.
//!
//! Every variant implements the same [`Worker`] interface and talks to the
//! outside world only through the [`WorkerContext`] it is handed: the
//! generation backend, the memory store and an HTTP client.

mod general;
mod info_hunter;
mod tool_creator;
mod tool_executor;
mod web;

pub use general::GeneralWorker;
pub use info_hunter::InfoHunterWorker;
pub use tool_creator::ToolCreatorWorker;
pub use tool_executor::ToolExecutorWorker;
pub use web::WebWorker;

use crate::config::WorkerSettings;
use crate::types::{TaskId, TaskRequest, WorkerVariant};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tac_agent::{GenerationBackend, GenerationParams};
use tac_core::{TacError, TacResult, TaskError};
use tac_memory::MemoryStore;
use tracing::debug;

/// One task attempt handed to a worker.
#[derive(Debug, Clone)]
pub struct TaskAssignment {
    /// Task this attempt belongs to.
    pub task_id: TaskId,
    /// 1-based attempt number.
    pub attempt: u32,
    /// The submitted request.
    pub request: TaskRequest,
}

impl TaskAssignment {
    /// Memory key `task:<id>:<suffix>`.
    pub fn key(&self, suffix: &str) -> String {
        format!("task:{}:{suffix}", self.task_id)
    }

    /// Key under which the final output is stored.
    pub fn result_key(&self) -> String {
        self.key("result")
    }
}

/// Collaborators shared by all workers. Safe for concurrent use.
pub struct WorkerContext {
    /// Text generation.
    pub backend: Arc<dyn GenerationBackend>,
    /// Shared memory for results and task chaining.
    pub memory: Arc<dyn MemoryStore>,
    /// Interpreter, timeouts and output limits.
    pub settings: WorkerSettings,
    /// Client for page fetches.
    pub http: reqwest::Client,
}

impl WorkerContext {
    /// Bundle the collaborators and build the HTTP client.
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        memory: Arc<dyn MemoryStore>,
        settings: WorkerSettings,
    ) -> TacResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.fetch_timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(concat!("tac/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TacError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            backend,
            memory,
            settings,
            http,
        })
    }

    pub(crate) async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, TaskError> {
        debug!(provider = self.backend.provider(), "Calling generation backend");
        Ok(self.backend.generate(prompt, params).await?)
    }

    pub(crate) async fn remember(&self, key: &str, value: &str) -> Result<(), TaskError> {
        Ok(self.memory.store(key, value).await?)
    }

    pub(crate) async fn recall(&self, key: &str) -> Result<Option<String>, TaskError> {
        Ok(self.memory.retrieve(key).await?)
    }

    /// Store the final output under the task's result key and hand it back.
    pub(crate) async fn finish(
        &self,
        task: &TaskAssignment,
        output: String,
    ) -> Result<String, TaskError> {
        self.remember(&task.result_key(), &output).await?;
        Ok(output)
    }
}

/// Executes one task at a time.
#[async_trait]
pub trait Worker: Send + Sync {
    /// The specialization this implementation provides.
    fn variant(&self) -> WorkerVariant;

    /// Run one attempt. Errors are classified by [`TaskError::is_retryable`].
    async fn execute(&self, task: &TaskAssignment, ctx: &WorkerContext)
        -> Result<String, TaskError>;
}

/// Instantiate the worker implementation for `variant`.
pub fn build_worker(variant: WorkerVariant) -> Arc<dyn Worker> {
    match variant {
        WorkerVariant::General => Arc::new(GeneralWorker),
        WorkerVariant::WebInteraction => Arc::new(WebWorker),
        WorkerVariant::ToolCreator => Arc::new(ToolCreatorWorker),
        WorkerVariant::ToolExecutor => Arc::new(ToolExecutorWorker),
        WorkerVariant::InfoHunter => Arc::new(InfoHunterWorker),
    }
}

/// Cut `text` to at most `max_chars` characters.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
