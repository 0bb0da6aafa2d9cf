use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tac_core::{TacError, TaskError};
use uuid::Uuid;

// --- Identifiers ---

/// Unique identifier of a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// A fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for TaskId {
    type Err = TacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| TacError::TaskNotFound(s.to_string()))
    }
}

/// Identifier of a pooled worker, formatted `<variant>-<8 hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    /// A fresh id for a worker of `variant`.
    pub fn new(variant: WorkerVariant) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}", variant.as_str(), &suffix[..8]))
    }

    /// The id as text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// --- Workers ---

/// Closed set of worker specializations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerVariant {
    /// Plans a free-text goal with the generation backend.
    General,
    /// Fetches and digests a web page.
    WebInteraction,
    /// Generates a reusable script.
    ToolCreator,
    /// Runs a script with the configured interpreter.
    ToolExecutor,
    /// Plans a search and synthesizes a report.
    InfoHunter,
}

impl WorkerVariant {
    /// Every variant, in a stable order.
    pub const ALL: [WorkerVariant; 5] = [
        WorkerVariant::General,
        WorkerVariant::WebInteraction,
        WorkerVariant::ToolCreator,
        WorkerVariant::ToolExecutor,
        WorkerVariant::InfoHunter,
    ];

    /// Canonical snake_case name, as used in config and status.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerVariant::General => "general",
            WorkerVariant::WebInteraction => "web_interaction",
            WorkerVariant::ToolCreator => "tool_creator",
            WorkerVariant::ToolExecutor => "tool_executor",
            WorkerVariant::InfoHunter => "info_hunter",
        }
    }

    /// Parse a canonical variant name.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.as_str() == name)
    }
}

impl std::fmt::Display for WorkerVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a pooled worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Pooled and free.
    Idle,
    /// Running a task.
    Busy,
    /// Being retired; will not take another task.
    Terminating,
}

/// Public view of one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatusView {
    /// Pool id.
    pub id: WorkerId,
    /// Specialization.
    pub variant: WorkerVariant,
    /// Current lifecycle state.
    pub state: WorkerState,
    /// Task being run, if busy.
    pub current_task: Option<TaskId>,
    /// Attempts this worker finished successfully.
    pub tasks_completed: u64,
    /// Attempts this worker finished with an error.
    pub tasks_failed: u64,
    /// When the worker was created.
    pub created_at: DateTime<Utc>,
    /// Last time it picked up or finished a task.
    pub last_active: DateTime<Utc>,
}

// --- Tasks ---

/// What a submitter asks for: a goal plus free-form parameters.
///
/// Deserializes from task-detail objects such as
/// `{"description": "...", "url": "https://..."}`; every key other than
/// `description` and `agent_type` lands in `params`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Free-text goal.
    #[serde(default)]
    pub description: String,
    /// Declared worker-type hint.
    #[serde(default, alias = "type", skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    /// Every other key of the submitted object.
    #[serde(flatten)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl TaskRequest {
    /// A request with only a description.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }

    /// Set the worker-type hint.
    pub fn with_agent_type(mut self, hint: impl Into<String>) -> Self {
        self.agent_type = Some(hint.into());
        self
    }

    /// Add or replace a parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// A string parameter, ignoring blank values.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// True when `key` is present and not null.
    pub fn has_param(&self, key: &str) -> bool {
        self.params.get(key).is_some_and(|v| !v.is_null())
    }
}

/// Stage of a task in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStage {
    /// Waiting for a worker.
    Queued,
    /// An attempt is in progress.
    Running,
    /// Waiting out the backoff after a failed attempt.
    Retrying,
    /// Finished with a result.
    Succeeded,
    /// Finished without one.
    Failed,
}

impl TaskStage {
    /// Succeeded or failed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStage::Succeeded | TaskStage::Failed)
    }
}

impl std::fmt::Display for TaskStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStage::Queued => "queued",
            TaskStage::Running => "running",
            TaskStage::Retrying => "retrying",
            TaskStage::Succeeded => "succeeded",
            TaskStage::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Serializable record of the last failed attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    /// Error class, e.g. `generation_transient` or `cancelled`.
    pub code: String,
    /// Human-readable error text.
    pub message: String,
    /// Whether the error class allows another attempt.
    pub retryable: bool,
}

impl From<&TaskError> for TaskFailure {
    fn from(err: &TaskError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

/// A task tracked by the engine.
///
/// The request is immutable after submission; every other field is runtime
/// state mutated only by the dispatch loop.
#[derive(Debug, Clone)]
pub struct Task {
    /// Engine-assigned id.
    pub id: TaskId,
    /// The submitted request.
    pub request: TaskRequest,
    /// Resolved on first dispatch.
    pub variant: Option<WorkerVariant>,
    /// Number of the current (or last) attempt, starting at 1.
    pub attempts: u32,
    /// `max_task_retries + 1`, fixed at submission.
    pub max_attempts: u32,
    /// Current lifecycle stage.
    pub stage: TaskStage,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Last stage change.
    pub updated_at: DateTime<Utc>,
    /// Start of the latest attempt.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal stage.
    pub finished_at: Option<DateTime<Utc>>,
    /// When a retrying task becomes eligible again.
    pub retry_at: Option<DateTime<Utc>>,
    /// Worker running the current attempt.
    pub worker: Option<WorkerId>,
    /// Output of the successful attempt.
    pub result: Option<String>,
    /// Error of the last failed attempt.
    pub last_error: Option<TaskFailure>,
}

impl Task {
    /// A queued task on its first attempt.
    pub fn new(request: TaskRequest, max_attempts: u32) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            request,
            variant: None,
            attempts: 1,
            max_attempts: max_attempts.max(1),
            stage: TaskStage::Queued,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
            retry_at: None,
            worker: None,
            result: None,
            last_error: None,
        }
    }

    /// Move to `stage`, stamping the transition time.
    pub fn transition(&mut self, stage: TaskStage) {
        let now = Utc::now();
        self.stage = stage;
        self.updated_at = now;
        match stage {
            TaskStage::Running => {
                self.started_at = Some(now);
                self.retry_at = None;
            }
            TaskStage::Succeeded | TaskStage::Failed => {
                self.finished_at = Some(now);
                self.retry_at = None;
                self.worker = None;
            }
            TaskStage::Queued => self.retry_at = None,
            TaskStage::Retrying => self.worker = None,
        }
    }

    /// The public snapshot of this task.
    pub fn view(&self) -> TaskStatusView {
        TaskStatusView {
            id: self.id,
            description: self.request.description.clone(),
            agent_type: self.request.agent_type.clone(),
            variant: self.variant,
            stage: self.stage,
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            created_at: self.created_at,
            updated_at: self.updated_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            retry_at: self.retry_at,
            worker_id: self.worker.clone(),
            result: self.result.clone(),
            error: self.last_error.clone(),
        }
    }

    /// The queue listing entry for this task.
    pub fn summary(&self) -> QueuedTaskSummary {
        QueuedTaskSummary {
            id: self.id,
            description: self.request.description.clone(),
            agent_type: self.request.agent_type.clone(),
            stage: self.stage,
            attempts: self.attempts,
            retry_at: self.retry_at,
        }
    }
}

/// Public view of one task, as returned by `status(task_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusView {
    /// Task id.
    pub id: TaskId,
    /// Submitted goal.
    pub description: String,
    /// Declared worker-type hint.
    pub agent_type: Option<String>,
    /// Resolved worker variant, once dispatched.
    pub variant: Option<WorkerVariant>,
    /// Current stage.
    pub stage: TaskStage,
    /// Current (or last) attempt number.
    pub attempts: u32,
    /// Attempts allowed in total.
    pub max_attempts: u32,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Last stage change.
    pub updated_at: DateTime<Utc>,
    /// Start of the latest attempt.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal stage.
    pub finished_at: Option<DateTime<Utc>>,
    /// When a retrying task becomes eligible again.
    pub retry_at: Option<DateTime<Utc>>,
    /// Worker running the current attempt.
    pub worker_id: Option<WorkerId>,
    /// Present only once the task has succeeded.
    pub result: Option<String>,
    /// Present after any failed attempt.
    pub error: Option<TaskFailure>,
}

/// Pending entry as listed by `peek_all`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedTaskSummary {
    /// Task id.
    pub id: TaskId,
    /// Submitted goal.
    pub description: String,
    /// Declared worker-type hint.
    pub agent_type: Option<String>,
    /// `queued` or `retrying`.
    pub stage: TaskStage,
    /// Current attempt number.
    pub attempts: u32,
    /// Eligibility time of a retrying entry.
    pub retry_at: Option<DateTime<Utc>>,
}

/// Number of tracked tasks per stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCounts {
    /// Waiting for a worker.
    pub queued: usize,
    /// Attempt in progress.
    pub running: usize,
    /// In backoff.
    pub retrying: usize,
    /// Finished with a result.
    pub succeeded: usize,
    /// Finished without one.
    pub failed: usize,
}

impl StageCounts {
    /// Count one task in `stage`.
    pub fn record(&mut self, stage: TaskStage) {
        match stage {
            TaskStage::Queued => self.queued += 1,
            TaskStage::Running => self.running += 1,
            TaskStage::Retrying => self.retrying += 1,
            TaskStage::Succeeded => self.succeeded += 1,
            TaskStage::Failed => self.failed += 1,
        }
    }

    /// Tasks that have not reached a terminal stage.
    pub fn active(&self) -> usize {
        self.queued + self.running + self.retrying
    }
}

/// Point-in-time view of the whole engine, as returned by `status_all()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// When the snapshot was taken.
    pub generated_at: DateTime<Utc>,
    /// Tasks per stage.
    pub counts: StageCounts,
    /// Pending tasks in dispatch order, then retrying tasks by eligibility.
    pub queue: Vec<QueuedTaskSummary>,
    /// Every tracked task, oldest first.
    pub tasks: Vec<TaskStatusView>,
    /// Every live or recently retired worker.
    pub workers: Vec<WorkerStatusView>,
    /// Workers running a task.
    pub busy_workers: usize,
    /// Configured ceiling.
    pub max_concurrent_agents: usize,
}
