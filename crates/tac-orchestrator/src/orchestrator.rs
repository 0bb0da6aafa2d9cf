use crate::config::{OrchestratorConfig, WorkerSettings};
use crate::dispatcher::{Dispatcher, Shared};
use crate::pool::WorkerPool;
use crate::status::StatusRegistry;
use crate::types::{StatusSnapshot, Task, TaskId, TaskRequest, TaskStatusView, WorkerId, WorkerStatusView};
use crate::variant::VariantResolver;
use crate::workers::WorkerContext;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tac_agent::GenerationBackend;
use tac_core::{TacError, TacResult};
use tac_memory::MemoryStore;
use tokio::task::JoinHandle;
use tracing::info;

/// Cloneable handle to the dispatch engine.
///
/// The handle is the whole boundary surface: submitters enqueue work and
/// poll status through it, and it owns the loop's lifecycle.
#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
    resolver: VariantResolver,
    idle_loop: Arc<Mutex<Option<Dispatcher>>>,
    handle: Arc<Mutex<Option<JoinHandle<TacResult<()>>>>>,
}

impl Orchestrator {
    /// Build an engine with default worker settings.
    pub fn new(
        config: OrchestratorConfig,
        backend: Arc<dyn GenerationBackend>,
        memory: Arc<dyn MemoryStore>,
    ) -> TacResult<Self> {
        Self::with_worker_settings(config, WorkerSettings::default(), backend, memory)
    }

    /// Build an engine with explicit worker settings.
    pub fn with_worker_settings(
        config: OrchestratorConfig,
        settings: WorkerSettings,
        backend: Arc<dyn GenerationBackend>,
        memory: Arc<dyn MemoryStore>,
    ) -> TacResult<Self> {
        config.validate()?;
        let resolver = VariantResolver::new(&config.worker_variant_map)?;
        let ctx = Arc::new(WorkerContext::new(backend, memory, settings)?);

        let registry = Arc::new(StatusRegistry::new());
        let pool = WorkerPool::new(
            config.max_concurrent_agents,
            config.recycle_workers,
            registry.clone(),
        );
        let shared = Arc::new(Shared::new(config, registry));
        let dispatcher = Dispatcher::new(shared.clone(), pool, resolver.clone(), ctx);

        Ok(Self {
            shared,
            resolver,
            idle_loop: Arc::new(Mutex::new(Some(dispatcher))),
            handle: Arc::new(Mutex::new(None)),
        })
    }

    /// The validated engine configuration.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.shared.config
    }

    /// The hint table used to route tasks.
    pub fn resolver(&self) -> &VariantResolver {
        &self.resolver
    }

    /// Spawn the dispatch loop on the current Tokio runtime.
    pub fn start(&self) -> TacResult<()> {
        let dispatcher = self
            .idle_loop
            .lock()
            .take()
            .ok_or(TacError::AlreadyRunning)?;
        let handle = tokio::spawn(dispatcher.run());
        *self.handle.lock() = Some(handle);
        Ok(())
    }

    /// Queue a task. Never blocks; fails with `QueueFull` or `ShuttingDown`.
    pub fn submit(&self, request: TaskRequest) -> TacResult<TaskId> {
        if self.shared.shutdown.is_cancelled() {
            return Err(TacError::ShuttingDown);
        }

        let task = Task::new(request, self.shared.config.max_attempts());
        let id = task.id;
        {
            // The queued view is recorded under the queue lock so the loop
            // cannot overwrite a later stage with it.
            let mut queue = self.shared.queue.lock();
            queue.enqueue(task)?;
            if let Some(queued) = queue.get(id) {
                self.shared.registry.update_task(queued.view());
            }
        }
        self.shared.submitted.notify_one();

        info!(task_id = %id, "Task submitted");
        Ok(id)
    }

    /// Latest view of one task; `TaskNotFound` once evicted or never seen.
    pub fn status(&self, id: TaskId) -> TacResult<TaskStatusView> {
        self.shared
            .registry
            .task(id)
            .ok_or_else(|| TacError::TaskNotFound(id.to_string()))
    }

    /// Snapshot of every tracked task and worker.
    pub fn status_all(&self) -> StatusSnapshot {
        self.shared.snapshot()
    }

    /// Latest view of one worker.
    pub fn worker_status(&self, id: &WorkerId) -> TacResult<WorkerStatusView> {
        self.shared
            .registry
            .worker(id)
            .ok_or_else(|| TacError::WorkerNotFound(id.to_string()))
    }

    /// True when nothing is queued, retrying or running.
    pub fn is_idle(&self) -> bool {
        self.shared.queue.lock().is_empty() && self.shared.registry.counts().active() == 0
    }

    /// True once `shutdown` has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Stop the engine and wait for the loop to finish draining.
    ///
    /// In-flight tasks get `grace` to complete. Returns the loop's own result,
    /// so an invariant violation inside the loop surfaces here.
    pub async fn shutdown(&self, grace: Duration) -> TacResult<()> {
        *self.shared.grace.lock() = grace;
        self.shared.shutdown.cancel();

        // Never started: drain the queue inline.
        let idle_loop = self.idle_loop.lock().take();
        if let Some(dispatcher) = idle_loop {
            return dispatcher.run().await;
        }

        let handle = self.handle.lock().take();
        match handle {
            Some(handle) => handle
                .await
                .map_err(|e| TacError::Invariant(format!("dispatch loop panicked: {e}")))?,
            None => Ok(()),
        }
    }
}
