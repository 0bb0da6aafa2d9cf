use crate::status::StatusRegistry;
use crate::types::{TaskId, WorkerId, WorkerState, WorkerStatusView, WorkerVariant};
use crate::workers::{build_worker, Worker};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tac_core::{TacError, TacResult};
use tracing::{debug, info};

struct PooledWorker {
    id: WorkerId,
    variant: WorkerVariant,
    state: WorkerState,
    current_task: Option<TaskId>,
    worker: Arc<dyn Worker>,
    tasks_completed: u64,
    tasks_failed: u64,
    created_at: DateTime<Utc>,
    last_active: DateTime<Utc>,
}

impl PooledWorker {
    fn view(&self) -> WorkerStatusView {
        WorkerStatusView {
            id: self.id.clone(),
            variant: self.variant,
            state: self.state,
            current_task: self.current_task,
            tasks_completed: self.tasks_completed,
            tasks_failed: self.tasks_failed,
            created_at: self.created_at,
            last_active: self.last_active,
        }
    }
}

/// A busy worker handed to the dispatch loop for one task.
#[derive(Clone)]
pub struct Lease {
    /// Pool id of the worker.
    pub id: WorkerId,
    /// Variant the worker was built as.
    pub variant: WorkerVariant,
    /// The worker itself.
    pub worker: Arc<dyn Worker>,
}

/// Creates, recycles and retires workers under a ceiling on live workers.
///
/// Owned by the dispatch loop; every state change is mirrored into the
/// status registry.
pub struct WorkerPool {
    max: usize,
    recycle: bool,
    workers: HashMap<WorkerId, PooledWorker>,
    registry: Arc<StatusRegistry>,
}

impl WorkerPool {
    /// An empty pool allowing at most `max` live workers.
    pub fn new(max: usize, recycle: bool, registry: Arc<StatusRegistry>) -> Self {
        Self {
            max,
            recycle,
            workers: HashMap::new(),
            registry,
        }
    }

    /// Live workers, idle or busy.
    pub fn live(&self) -> usize {
        self.workers.len()
    }

    /// Workers currently running a task.
    pub fn busy(&self) -> usize {
        self.workers
            .values()
            .filter(|w| w.state == WorkerState::Busy)
            .count()
    }

    /// Hand out a worker of `variant` for `task`.
    ///
    /// Order of preference: an idle worker of the same variant, a new worker
    /// while below the ceiling, a new worker replacing an idle one of another
    /// variant. Fails with `CapacityExceeded` when every live worker is busy.
    pub fn acquire(&mut self, variant: WorkerVariant, task: TaskId) -> TacResult<Lease> {
        if self.workers.len() > self.max {
            return Err(TacError::Invariant(format!(
                "pool holds {} workers, ceiling is {}",
                self.workers.len(),
                self.max
            )));
        }

        if self.recycle {
            let reusable = self
                .workers
                .values()
                .filter(|w| w.state == WorkerState::Idle && w.variant == variant)
                .min_by_key(|w| w.last_active)
                .map(|w| w.id.clone());
            if let Some(id) = reusable {
                debug!(worker_id = %id, task_id = %task, "Reusing idle worker");
                return self.assign(&id, task);
            }
        }

        if self.workers.len() >= self.max {
            let victim = self
                .workers
                .values()
                .filter(|w| w.state == WorkerState::Idle)
                .min_by_key(|w| w.last_active)
                .map(|w| w.id.clone());
            match victim {
                Some(id) => self.retire(&id),
                None => return Err(TacError::CapacityExceeded { max: self.max }),
            }
        }

        let id = WorkerId::new(variant);
        let now = Utc::now();
        self.workers.insert(
            id.clone(),
            PooledWorker {
                id: id.clone(),
                variant,
                state: WorkerState::Idle,
                current_task: None,
                worker: build_worker(variant),
                tasks_completed: 0,
                tasks_failed: 0,
                created_at: now,
                last_active: now,
            },
        );
        info!(worker_id = %id, variant = %variant, live = self.workers.len(), "Worker created");
        self.assign(&id, task)
    }

    /// Return a worker after its task finished.
    ///
    /// A healthy worker goes back to idle when recycling is on. Otherwise it
    /// is terminated and leaves the pool.
    pub fn release(&mut self, id: &WorkerId, healthy: bool, succeeded: bool) -> TacResult<()> {
        let worker = self
            .workers
            .get_mut(id)
            .ok_or_else(|| TacError::Invariant(format!("released unknown worker {id}")))?;
        if worker.state != WorkerState::Busy {
            return Err(TacError::Invariant(format!(
                "released worker {id} in state {:?}",
                worker.state
            )));
        }

        worker.current_task = None;
        worker.last_active = Utc::now();
        if succeeded {
            worker.tasks_completed += 1;
        } else {
            worker.tasks_failed += 1;
        }

        if healthy && self.recycle {
            worker.state = WorkerState::Idle;
            self.registry.update_worker(worker.view());
        } else {
            self.retire(id);
        }
        Ok(())
    }

    /// Terminate every worker. Used at shutdown.
    pub fn retire_all(&mut self) {
        let ids: Vec<WorkerId> = self.workers.keys().cloned().collect();
        for id in ids {
            self.retire(&id);
        }
    }

    fn assign(&mut self, id: &WorkerId, task: TaskId) -> TacResult<Lease> {
        let worker = self
            .workers
            .get_mut(id)
            .ok_or_else(|| TacError::Invariant(format!("assigning unknown worker {id}")))?;
        worker.state = WorkerState::Busy;
        worker.current_task = Some(task);
        worker.last_active = Utc::now();
        self.registry.update_worker(worker.view());
        Ok(Lease {
            id: worker.id.clone(),
            variant: worker.variant,
            worker: worker.worker.clone(),
        })
    }

    fn retire(&mut self, id: &WorkerId) {
        if let Some(mut worker) = self.workers.remove(id) {
            worker.state = WorkerState::Terminating;
            worker.current_task = None;
            worker.last_active = Utc::now();
            self.registry.update_worker(worker.view());
            info!(worker_id = %id, variant = %worker.variant, "Worker terminated");
        }
    }
}
