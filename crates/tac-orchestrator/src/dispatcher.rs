use crate::config::OrchestratorConfig;
use crate::pool::{Lease, WorkerPool};
use crate::status::StatusRegistry;
use crate::task_queue::TaskQueue;
use crate::types::{StageCounts, StatusSnapshot, Task, TaskFailure, TaskId, TaskStage, WorkerId};
use crate::variant::VariantResolver;
use crate::workers::{TaskAssignment, WorkerContext};
use chrono::Utc;
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tac_core::{TacError, TacResult, TaskError};
use tokio::sync::Notify;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// State shared between the dispatch loop and the `Orchestrator` handle.
pub(crate) struct Shared {
    pub(crate) config: OrchestratorConfig,
    pub(crate) queue: Mutex<TaskQueue>,
    pub(crate) registry: Arc<StatusRegistry>,
    /// Signalled on every successful submission.
    pub(crate) submitted: Notify,
    pub(crate) shutdown: CancellationToken,
    pub(crate) grace: Mutex<Duration>,
}

impl Shared {
    pub(crate) fn new(config: OrchestratorConfig, registry: Arc<StatusRegistry>) -> Self {
        let grace = config.shutdown_grace();
        Self {
            queue: Mutex::new(TaskQueue::new(config.task_queue_limit)),
            config,
            registry,
            submitted: Notify::new(),
            shutdown: CancellationToken::new(),
            grace: Mutex::new(grace),
        }
    }

    pub(crate) fn snapshot(&self) -> StatusSnapshot {
        let queue = self.queue.lock().peek_all();
        let tasks = self.registry.tasks();
        let workers = self.registry.workers();

        let mut counts = StageCounts::default();
        for task in &tasks {
            counts.record(task.stage);
        }
        let busy_workers = workers
            .iter()
            .filter(|w| w.state == crate::types::WorkerState::Busy)
            .count();

        StatusSnapshot {
            generated_at: Utc::now(),
            counts,
            queue,
            tasks,
            workers,
            busy_workers,
            max_concurrent_agents: self.config.max_concurrent_agents,
        }
    }
}

/// Result of one execution, reported back to the loop.
struct Completion {
    task_id: TaskId,
    worker_id: WorkerId,
    outcome: Result<String, TaskError>,
}

enum Event {
    Shutdown,
    Joined(Result<Completion, JoinError>),
    Wake,
}

/// The coordination loop.
///
/// Sole owner of the worker pool and of every in-flight task. Pulls from the
/// queue while the pool has room, runs workers on a `JoinSet`, and turns
/// each outcome into a stage transition. Worker failures never escape the
/// loop; only broken internal accounting ends it with an error.
pub struct Dispatcher {
    shared: Arc<Shared>,
    pool: WorkerPool,
    resolver: VariantResolver,
    ctx: Arc<WorkerContext>,
    in_flight: HashMap<TaskId, Task>,
    running: JoinSet<Completion>,
    last_sweep: Option<Instant>,
    last_publish: Option<Instant>,
    /// Status write in progress; the loop never awaits it.
    publisher: Option<JoinHandle<()>>,
}

impl Dispatcher {
    pub(crate) fn new(
        shared: Arc<Shared>,
        pool: WorkerPool,
        resolver: VariantResolver,
        ctx: Arc<WorkerContext>,
    ) -> Self {
        Self {
            shared,
            pool,
            resolver,
            ctx,
            in_flight: HashMap::new(),
            running: JoinSet::new(),
            last_sweep: None,
            last_publish: None,
            publisher: None,
        }
    }

    /// Run until shutdown is requested, then drain.
    pub async fn run(mut self) -> TacResult<()> {
        let tick = self.shared.config.tick();
        info!(
            max_concurrent_agents = self.shared.config.max_concurrent_agents,
            task_queue_limit = self.shared.config.task_queue_limit,
            max_task_retries = self.shared.config.max_task_retries,
            "Dispatch loop started"
        );

        while !self.shared.shutdown.is_cancelled() {
            self.promote_due_retries();
            self.dispatch_ready()?;
            self.housekeeping();

            let mut wake = Instant::now() + tick;
            if let Some(next) = self.shared.queue.lock().next_eligible_at() {
                wake = wake.min(next);
            }

            let event = tokio::select! {
                biased;
                _ = self.shared.shutdown.cancelled() => Event::Shutdown,
                Some(joined) = self.running.join_next(), if !self.running.is_empty() => {
                    Event::Joined(joined)
                }
                _ = self.shared.submitted.notified() => Event::Wake,
                _ = tokio::time::sleep_until(wake) => Event::Wake,
            };

            match event {
                Event::Shutdown => break,
                Event::Joined(joined) => self.on_joined(joined)?,
                Event::Wake => {}
            }
        }

        self.drain().await
    }

    fn promote_due_retries(&mut self) {
        let promoted: Vec<_> = {
            let mut queue = self.shared.queue.lock();
            let ids = queue.promote_due(Instant::now());
            ids.into_iter()
                .filter_map(|id| queue.get(id).map(Task::view))
                .collect()
        };
        for view in promoted {
            debug!(task_id = %view.id, attempt = view.attempts, "Retry eligible, back in queue");
            self.shared.registry.update_task(view);
        }
    }

    /// Start queued tasks until the queue is empty or the pool is full.
    fn dispatch_ready(&mut self) -> TacResult<()> {
        loop {
            if self.shared.shutdown.is_cancelled() {
                return Ok(());
            }
            if self.pool.busy() != self.in_flight.len() {
                return Err(TacError::Invariant(format!(
                    "{} busy workers but {} tasks in flight",
                    self.pool.busy(),
                    self.in_flight.len()
                )));
            }

            let head = {
                let queue = self.shared.queue.lock();
                queue
                    .peek()
                    .map(|task| (task.id, self.resolver.resolve(&task.request)))
            };
            let Some((task_id, resolved)) = head else {
                return Ok(());
            };

            let variant = match resolved {
                Ok(variant) => variant,
                Err(err) => {
                    let task = self.take_head(task_id)?;
                    self.retry_or_fail(task, err)?;
                    continue;
                }
            };

            let lease = match self.pool.acquire(variant, task_id) {
                Ok(lease) => lease,
                Err(TacError::CapacityExceeded { max }) => {
                    debug!(task_id = %task_id, max, "Pool at capacity, dispatch deferred");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            let mut task = self.take_head(task_id)?;
            task.variant = Some(variant);
            self.start(task, lease);
        }
    }

    fn take_head(&self, expected: TaskId) -> TacResult<Task> {
        match self.shared.queue.lock().dequeue() {
            Some(task) if task.id == expected => Ok(task),
            Some(task) => Err(TacError::Invariant(format!(
                "queue head changed from {expected} to {}",
                task.id
            ))),
            None => Err(TacError::Invariant(format!(
                "queue emptied before {expected} was dequeued"
            ))),
        }
    }

    fn start(&mut self, mut task: Task, lease: Lease) {
        task.worker = Some(lease.id.clone());
        task.transition(TaskStage::Running);
        self.shared.registry.update_task(task.view());
        info!(
            task_id = %task.id,
            worker_id = %lease.id,
            variant = %lease.variant,
            attempt = task.attempts,
            max_attempts = task.max_attempts,
            "Task started"
        );

        let assignment = TaskAssignment {
            task_id: task.id,
            attempt: task.attempts,
            request: task.request.clone(),
        };
        self.in_flight.insert(task.id, task);

        let ctx = self.ctx.clone();
        let Lease {
            id: worker_id,
            worker,
            ..
        } = lease;
        self.running.spawn(async move {
            let outcome = AssertUnwindSafe(worker.execute(&assignment, &ctx))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(TaskError::WorkerCrash(panic_message(&*payload))));
            Completion {
                task_id: assignment.task_id,
                worker_id,
                outcome,
            }
        });
    }

    fn on_joined(&mut self, joined: Result<Completion, JoinError>) -> TacResult<()> {
        match joined {
            Ok(completion) => self.complete(completion),
            // Aborted during shutdown; the task is cancelled by `drain`.
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(TacError::Invariant(format!(
                "execution escaped the worker boundary: {e}"
            ))),
        }
    }

    fn complete(&mut self, completion: Completion) -> TacResult<()> {
        let Completion {
            task_id,
            worker_id,
            outcome,
        } = completion;

        let mut task = self.in_flight.remove(&task_id).ok_or_else(|| {
            TacError::Invariant(format!("completion for unknown task {task_id}"))
        })?;
        let healthy = !matches!(outcome, Err(TaskError::WorkerCrash(_)));
        self.pool.release(&worker_id, healthy, outcome.is_ok())?;

        match outcome {
            Ok(output) => {
                task.result = Some(output);
                task.transition(TaskStage::Succeeded);
                self.shared.registry.update_task(task.view());
                info!(task_id = %task_id, worker_id = %worker_id, attempt = task.attempts, "Task succeeded");
                Ok(())
            }
            Err(err) => self.retry_or_fail(task, err),
        }
    }

    /// Requeue a failed attempt with backoff, or end the task.
    ///
    /// Errors that do not consume an attempt never ran a worker and are
    /// terminal at once.
    fn retry_or_fail(&mut self, mut task: Task, err: TaskError) -> TacResult<()> {
        if self.shared.shutdown.is_cancelled() && err.is_retryable() {
            let reason = format!("shutdown before retry; last error: {err}");
            self.fail(task, TaskError::Cancelled(reason));
            return Ok(());
        }
        if !err.consumes_attempt()
            || !err.is_retryable()
            || task.attempts >= task.max_attempts
        {
            self.fail(task, err);
            return Ok(());
        }

        let delay = self.shared.config.retry_backoff.delay_for(task.attempts);
        warn!(
            task_id = %task.id,
            attempt = task.attempts,
            max_attempts = task.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Task attempt failed, retrying"
        );
        task.last_error = Some(TaskFailure::from(&err));
        task.attempts += 1;

        let task_id = task.id;
        let view = {
            let mut queue = self.shared.queue.lock();
            queue.requeue_after(task, Instant::now() + delay)?;
            queue.get(task_id).map(Task::view)
        };
        if let Some(view) = view {
            self.shared.registry.update_task(view);
        }
        Ok(())
    }

    fn fail(&self, mut task: Task, err: TaskError) {
        task.last_error = Some(TaskFailure::from(&err));
        task.transition(TaskStage::Failed);
        self.shared.registry.update_task(task.view());
        error!(
            task_id = %task.id,
            attempts = task.attempts,
            code = err.code(),
            error = %err,
            "Task failed"
        );
    }

    fn housekeeping(&mut self) {
        let config = &self.shared.config;

        if self
            .last_sweep
            .map_or(true, |at| at.elapsed() >= config.tick())
        {
            self.last_sweep = Some(Instant::now());
            let evicted = self
                .shared
                .registry
                .evict(config.history_retention(), config.max_history);
            if evicted > 0 {
                debug!(evicted, "Evicted finished tasks from status registry");
            }
        }

        if config.status_update_interval_secs == 0 {
            return;
        }
        let interval = Duration::from_secs(config.status_update_interval_secs);
        if self.last_publish.is_some_and(|at| at.elapsed() < interval) {
            return;
        }
        if self.publisher.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("Previous status write still running, skipping this interval");
            return;
        }
        self.last_publish = Some(Instant::now());

        let json = match serde_json::to_string(&self.shared.snapshot()) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to serialize status snapshot");
                return;
            }
        };
        let memory = self.ctx.memory.clone();
        let key = config.status_memory_key.clone();
        self.publisher = Some(tokio::spawn(async move {
            if let Err(e) = memory.store(&key, &json).await {
                warn!(key = %key, error = %e, "Failed to publish status");
            }
        }));
    }

    /// Stop dispatching, give in-flight work the grace period, cancel the rest.
    async fn drain(mut self) -> TacResult<()> {
        let grace = *self.shared.grace.lock();
        info!(
            in_flight = self.in_flight.len(),
            queued = self.shared.queue.lock().len(),
            grace_ms = grace.as_millis() as u64,
            "Shutting down dispatch loop"
        );

        let deadline = Instant::now() + grace;
        while !self.running.is_empty() {
            match tokio::time::timeout_at(deadline, self.running.join_next()).await {
                Ok(Some(joined)) => self.on_joined(joined)?,
                Ok(None) | Err(_) => break,
            }
        }

        if !self.running.is_empty() {
            warn!(
                remaining = self.running.len(),
                "Grace period elapsed, aborting in-flight tasks"
            );
            self.running.abort_all();
            while let Some(joined) = self.running.join_next().await {
                self.on_joined(joined)?;
            }
        }

        let aborted: Vec<Task> = self.in_flight.drain().map(|(_, task)| task).collect();
        for task in aborted {
            if let Some(worker_id) = task.worker.clone() {
                self.pool.release(&worker_id, false, false)?;
            }
            self.fail(
                task,
                TaskError::Cancelled("execution aborted after shutdown grace period".into()),
            );
        }

        let pending = self.shared.queue.lock().drain();
        for task in pending {
            self.fail(task, TaskError::Cancelled("shutdown before dispatch".into()));
        }

        self.pool.retire_all();

        // A write still in flight would resurrect the key after the delete.
        if let Some(publisher) = self.publisher.take() {
            publisher.abort();
            if let Err(e) = publisher.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "Status publisher failed");
                }
            }
        }

        let config = &self.shared.config;
        if config.status_update_interval_secs > 0 {
            if let Err(e) = self.ctx.memory.delete(&config.status_memory_key).await {
                warn!(key = %config.status_memory_key, error = %e, "Failed to clear published status");
            }
        }

        info!("Dispatch loop stopped");
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}
