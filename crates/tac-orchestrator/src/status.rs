use crate::types::{
    StageCounts, TaskId, TaskStatusView, WorkerId, WorkerState, WorkerStatusView,
};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;

/// Latest public view of every tracked task and worker.
///
/// A plain state holder: observers read snapshots, the dispatch loop writes.
/// The only other writer is `submit`, which records a task's initial
/// `queued` view before the loop has seen it.
#[derive(Default)]
pub struct StatusRegistry {
    tasks: RwLock<HashMap<TaskId, TaskStatusView>>,
    workers: RwLock<HashMap<WorkerId, WorkerStatusView>>,
}

impl StatusRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the view of `view.id`.
    pub fn update_task(&self, view: TaskStatusView) {
        self.tasks.write().insert(view.id, view);
    }

    /// Latest view of one task.
    pub fn task(&self, id: TaskId) -> Option<TaskStatusView> {
        self.tasks.read().get(&id).cloned()
    }

    /// All tracked tasks, oldest first.
    pub fn tasks(&self) -> Vec<TaskStatusView> {
        let mut tasks: Vec<TaskStatusView> = self.tasks.read().values().cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        tasks
    }

    /// Replace the view of `view.id`.
    pub fn update_worker(&self, view: WorkerStatusView) {
        self.workers.write().insert(view.id.clone(), view);
    }

    /// Latest view of one worker.
    pub fn worker(&self, id: &WorkerId) -> Option<WorkerStatusView> {
        self.workers.read().get(id).cloned()
    }

    /// All tracked workers, by id.
    pub fn workers(&self) -> Vec<WorkerStatusView> {
        let mut workers: Vec<WorkerStatusView> =
            self.workers.read().values().cloned().collect();
        workers.sort_by(|a, b| a.id.cmp(&b.id));
        workers
    }

    /// Tasks per stage.
    pub fn counts(&self) -> StageCounts {
        let mut counts = StageCounts::default();
        for view in self.tasks.read().values() {
            counts.record(view.stage);
        }
        counts
    }

    /// Workers whose last recorded state is busy.
    pub fn busy_workers(&self) -> usize {
        self.workers
            .read()
            .values()
            .filter(|w| w.state == WorkerState::Busy)
            .count()
    }

    /// Drop terminal tasks older than `retention` and all but the
    /// `max_history` most recent ones, plus terminated workers older than
    /// `retention`. Returns the number of tasks evicted.
    pub fn evict(&self, retention: Duration, max_history: usize) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::zero());

        let evicted = {
            let mut tasks = self.tasks.write();
            let mut terminal: Vec<(TaskId, chrono::DateTime<Utc>)> = tasks
                .values()
                .filter(|v| v.stage.is_terminal())
                .map(|v| (v.id, v.finished_at.unwrap_or(v.updated_at)))
                .collect();
            // Newest first so the first `max_history` survive the count limit.
            terminal.sort_by(|a, b| b.1.cmp(&a.1));

            let mut evicted = 0;
            for (rank, (id, finished)) in terminal.into_iter().enumerate() {
                if retention.is_zero() || finished <= cutoff || rank >= max_history {
                    tasks.remove(&id);
                    evicted += 1;
                }
            }
            evicted
        };

        self.workers.write().retain(|_, w| {
            w.state != WorkerState::Terminating || (!retention.is_zero() && w.last_active > cutoff)
        });

        evicted
    }
}
