//! Dispatch engine for TAC.
//!
//! Tasks enter a bounded FIFO [`TaskQueue`], the [`Dispatcher`] loop pulls
//! them when the [`WorkerPool`] has room, runs the matching worker variant
//! concurrently, applies the retry policy on failure and records every stage
//! transition in the [`StatusRegistry`].
//!
//! External callers interact only with the [`Orchestrator`] handle:
//! `submit`, `status`, `status_all` and `shutdown`.

/// Engine configuration and validation.
pub mod config;
/// The coordination loop.
pub mod dispatcher;
/// Public handle over the running engine.
pub mod orchestrator;
/// Worker lifecycle and the concurrency ceiling.
pub mod pool;
/// Task and worker status views.
pub mod status;
/// Bounded FIFO queue with a delay set for retries.
pub mod task_queue;
/// Task, worker and snapshot types.
pub mod types;
/// Task-type hint to worker variant resolution.
pub mod variant;
/// Worker variants and their shared context.
pub mod workers;

pub use config::{OrchestratorConfig, RetryBackoff, WorkerSettings};
pub use dispatcher::Dispatcher;
pub use orchestrator::Orchestrator;
pub use pool::{Lease, WorkerPool};
pub use status::StatusRegistry;
pub use task_queue::TaskQueue;
pub use types::{
    QueuedTaskSummary, StageCounts, StatusSnapshot, Task, TaskFailure, TaskId, TaskRequest,
    TaskStage, TaskStatusView, WorkerId, WorkerState, WorkerStatusView, WorkerVariant,
};
pub use variant::VariantResolver;
pub use workers::{build_worker, TaskAssignment, Worker, WorkerContext};
