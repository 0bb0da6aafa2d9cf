use crate::types::{QueuedTaskSummary, Task, TaskId, TaskStage};
use chrono::Utc;
use std::collections::{HashSet, VecDeque};
use tac_core::{TacError, TacResult};
use tokio::time::Instant;

struct Delayed {
    eligible_at: Instant,
    task: Task,
}

/// Bounded FIFO of tasks waiting for a worker.
///
/// Tasks that failed an attempt and are waiting out their backoff sit in a
/// separate delay set. Once eligible they are appended at the tail, behind
/// fresh submissions. The limit bounds submissions only; a task already
/// accepted is never rejected on its way back from a failed attempt.
///
/// Draining closes the queue for good: later submissions fail with
/// `ShuttingDown` under the same lock that guards the drain.
pub struct TaskQueue {
    limit: usize,
    pending: VecDeque<Task>,
    delayed: Vec<Delayed>,
    ids: HashSet<TaskId>,
    closed: bool,
}

impl TaskQueue {
    /// An empty, open queue admitting at most `limit` submissions.
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            pending: VecDeque::new(),
            delayed: Vec::new(),
            ids: HashSet::new(),
            closed: false,
        }
    }

    /// Append a newly submitted task.
    ///
    /// Fails with `ShuttingDown` once the queue was drained, and with
    /// `QueueFull` when queued plus retrying tasks reach the limit.
    pub fn enqueue(&mut self, mut task: Task) -> TacResult<()> {
        if self.closed {
            return Err(TacError::ShuttingDown);
        }
        if self.len() >= self.limit {
            return Err(TacError::QueueFull { limit: self.limit });
        }
        if !self.ids.insert(task.id) {
            return Err(TacError::Invariant(format!(
                "task {} is already queued",
                task.id
            )));
        }
        task.transition(TaskStage::Queued);
        self.pending.push_back(task);
        Ok(())
    }

    /// Park a task that failed an attempt until `eligible_at`.
    pub fn requeue_after(&mut self, mut task: Task, eligible_at: Instant) -> TacResult<()> {
        if self.closed {
            return Err(TacError::Invariant(format!(
                "task {} requeued after the queue was drained",
                task.id
            )));
        }
        if !self.ids.insert(task.id) {
            return Err(TacError::Invariant(format!(
                "task {} is already queued",
                task.id
            )));
        }
        let wait = eligible_at.saturating_duration_since(Instant::now());
        task.transition(TaskStage::Retrying);
        task.retry_at = chrono::Duration::from_std(wait)
            .ok()
            .map(|d| Utc::now() + d);
        self.delayed.push(Delayed { eligible_at, task });
        Ok(())
    }

    /// Move every delayed task whose backoff has elapsed to the tail.
    ///
    /// Returns the promoted tasks' ids in promotion order.
    pub fn promote_due(&mut self, now: Instant) -> Vec<TaskId> {
        if self.delayed.iter().all(|d| d.eligible_at > now) {
            return Vec::new();
        }
        let (mut due, waiting): (Vec<Delayed>, Vec<Delayed>) = std::mem::take(&mut self.delayed)
            .into_iter()
            .partition(|d| d.eligible_at <= now);
        self.delayed = waiting;
        due.sort_by_key(|d| d.eligible_at);

        let mut promoted = Vec::with_capacity(due.len());
        for Delayed { mut task, .. } in due {
            task.transition(TaskStage::Queued);
            promoted.push(task.id);
            self.pending.push_back(task);
        }
        promoted
    }

    /// Earliest instant at which a delayed task becomes eligible.
    pub fn next_eligible_at(&self) -> Option<Instant> {
        self.delayed.iter().map(|d| d.eligible_at).min()
    }

    /// Remove and return the head task, if any.
    pub fn dequeue(&mut self) -> Option<Task> {
        let task = self.pending.pop_front()?;
        self.ids.remove(&task.id);
        Some(task)
    }

    /// The task `dequeue` would return next.
    pub fn peek(&self) -> Option<&Task> {
        self.pending.front()
    }

    /// A queued or retrying task by id.
    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.pending
            .iter()
            .find(|t| t.id == id)
            .or_else(|| self.delayed.iter().map(|d| &d.task).find(|t| t.id == id))
    }

    /// Ordered summaries: pending tasks in dispatch order, then retrying
    /// tasks by eligibility.
    pub fn peek_all(&self) -> Vec<QueuedTaskSummary> {
        let mut delayed: Vec<&Delayed> = self.delayed.iter().collect();
        delayed.sort_by_key(|d| d.eligible_at);
        self.pending
            .iter()
            .map(Task::summary)
            .chain(delayed.into_iter().map(|d| d.task.summary()))
            .collect()
    }

    /// Remove every queued and retrying task and close the queue.
    pub fn drain(&mut self) -> Vec<Task> {
        self.closed = true;
        self.ids.clear();
        let mut tasks: Vec<Task> = self.pending.drain(..).collect();
        tasks.extend(self.delayed.drain(..).map(|d| d.task));
        tasks
    }

    /// Queued plus retrying tasks.
    pub fn len(&self) -> usize {
        self.pending.len() + self.delayed.len()
    }

    /// Tasks waiting out a retry backoff.
    pub fn retrying_len(&self) -> usize {
        self.delayed.len()
    }

    /// True when nothing is queued or retrying.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.delayed.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::TaskRequest;
    use std::time::Duration;

    fn task(desc: &str) -> Task {
        Task::new(TaskRequest::new(desc), 2)
    }

    #[test]
    fn test_fifo_order() {
        let mut q = TaskQueue::new(10);
        let a = task("a");
        let b = task("b");
        let (ida, idb) = (a.id, b.id);
        q.enqueue(a).unwrap();
        q.enqueue(b).unwrap();
        assert_eq!(q.peek().map(|t| t.id), Some(ida));
        assert_eq!(q.dequeue().unwrap().id, ida);
        assert_eq!(q.dequeue().unwrap().id, idb);
        assert!(q.dequeue().is_none());
    }

    #[test]
    fn test_queue_full() {
        let mut q = TaskQueue::new(2);
        q.enqueue(task("a")).unwrap();
        q.enqueue(task("b")).unwrap();
        let err = q.enqueue(task("c")).unwrap_err();
        assert!(matches!(err, TacError::QueueFull { limit: 2 }));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_duplicate_id_is_invariant_violation() {
        let mut q = TaskQueue::new(5);
        let a = task("a");
        q.enqueue(a.clone()).unwrap();
        assert!(matches!(q.enqueue(a), Err(TacError::Invariant(_))));
    }

    #[test]
    fn test_retrying_counts_toward_limit_but_bypasses_it() {
        let mut q = TaskQueue::new(1);
        q.requeue_after(task("retry"), Instant::now() + Duration::from_secs(60))
            .unwrap();
        assert!(q.enqueue(task("fresh")).is_err());

        // Full, but a task coming back from a failed attempt is still admitted.
        q.requeue_after(task("another retry"), Instant::now())
            .unwrap();
        assert_eq!(q.retrying_len(), 2);
    }

    #[test]
    fn test_retry_goes_to_tail_once_due() {
        let mut q = TaskQueue::new(10);
        let fresh = task("fresh");
        let retry = task("retry");
        let (fresh_id, retry_id) = (fresh.id, retry.id);

        let now = Instant::now();
        q.requeue_after(retry, now).unwrap();
        q.enqueue(fresh).unwrap();
        assert_eq!(q.get(retry_id).unwrap().stage, TaskStage::Retrying);

        assert_eq!(q.promote_due(now), vec![retry_id]);
        assert_eq!(q.dequeue().unwrap().id, fresh_id);
        let promoted = q.dequeue().unwrap();
        assert_eq!(promoted.id, retry_id);
        assert_eq!(promoted.stage, TaskStage::Queued);
    }

    #[test]
    fn test_not_promoted_before_eligible() {
        let mut q = TaskQueue::new(10);
        let now = Instant::now();
        let eligible = now + Duration::from_millis(500);
        q.requeue_after(task("later"), eligible).unwrap();
        assert!(q.promote_due(now).is_empty());
        assert!(q.dequeue().is_none());
        assert_eq!(q.next_eligible_at(), Some(eligible));
        assert!(q.peek_all()[0].retry_at.is_some());
    }

    #[test]
    fn test_peek_all_orders_pending_then_delayed() {
        let mut q = TaskQueue::new(10);
        let now = Instant::now();
        let late = task("late");
        let soon = task("soon");
        let head = task("head");
        let (late_id, soon_id, head_id) = (late.id, soon.id, head.id);
        q.requeue_after(late, now + Duration::from_secs(9)).unwrap();
        q.requeue_after(soon, now + Duration::from_secs(1)).unwrap();
        q.enqueue(head).unwrap();

        let ids: Vec<TaskId> = q.peek_all().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![head_id, soon_id, late_id]);
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn test_drain_empties_everything() {
        let mut q = TaskQueue::new(10);
        q.enqueue(task("a")).unwrap();
        q.requeue_after(task("b"), Instant::now()).unwrap();
        assert_eq!(q.drain().len(), 2);
        assert!(q.is_empty());
    }

    #[test]
    fn test_drained_queue_rejects_submissions() {
        let mut q = TaskQueue::new(10);
        q.enqueue(task("a")).unwrap();
        q.drain();
        assert!(matches!(q.enqueue(task("late")), Err(TacError::ShuttingDown)));
        assert!(q.is_empty());
        assert!(matches!(
            q.requeue_after(task("retry"), Instant::now()),
            Err(TacError::Invariant(_))
        ));
    }
}
