#![allow(clippy::unwrap_used, clippy::expect_used)]

//! End-to-end behaviour of the dispatch engine: queue bounds, the
//! concurrency ceiling, retries with backoff, unknown worker types, crash
//! recovery and shutdown.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tac_agent::{GenerationBackend, GenerationParams};
use tac_core::{GenerationError, TacError, TacResult};
use tac_memory::{InMemoryStore, MemoryStore};
use tac_orchestrator::{
    Orchestrator, OrchestratorConfig, RetryBackoff, StatusSnapshot, TaskId, TaskRequest,
    TaskStage, TaskStatusView, WorkerState,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
enum Behavior {
    Succeed { delay_ms: u64 },
    AlwaysTransient,
    Permanent,
    PanicOnFirstCall,
}

/// Generation backend with scripted behaviour that records every call.
struct MockBackend {
    behavior: Behavior,
    calls: Mutex<Vec<Instant>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl MockBackend {
    fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl GenerationBackend for MockBackend {
    async fn generate(
        &self,
        prompt: &str,
        _params: &GenerationParams,
    ) -> Result<String, GenerationError> {
        let call_index = {
            let mut calls = self.calls.lock();
            calls.push(Instant::now());
            calls.len()
        };

        match self.behavior {
            Behavior::Succeed { delay_ms } => {
                let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now_active, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                self.active.fetch_sub(1, Ordering::SeqCst);
                Ok(format!("plan for: {}", prompt.lines().last().unwrap_or_default()))
            }
            Behavior::AlwaysTransient => Err(GenerationError::transient("503 upstream busy")),
            Behavior::Permanent => Err(GenerationError::permanent("400 bad request")),
            Behavior::PanicOnFirstCall => {
                if call_index == 1 {
                    panic!("simulated worker crash");
                }
                Ok("recovered".to_string())
            }
        }
    }

    fn provider(&self) -> &str {
        "mock"
    }
}

fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        tick_ms: 10,
        status_update_interval_secs: 0,
        retry_backoff: RetryBackoff::Fixed { delay_ms: 20 },
        ..OrchestratorConfig::default()
    }
}

fn engine(config: OrchestratorConfig, backend: Arc<MockBackend>) -> Orchestrator {
    Orchestrator::new(config, backend, Arc::new(InMemoryStore::new())).unwrap()
}

fn general(description: &str) -> TaskRequest {
    TaskRequest::new(description).with_agent_type("general")
}

/// Backend keyed on the task goal (the last prompt line): `flaky` goals fail
/// transiently once, `slow` goals take 400ms, everything else succeeds.
#[derive(Default)]
struct GoalBackend {
    failed_once: Mutex<HashSet<String>>,
}

#[async_trait]
impl GenerationBackend for GoalBackend {
    async fn generate(
        &self,
        prompt: &str,
        _params: &GenerationParams,
    ) -> Result<String, GenerationError> {
        let goal = prompt.lines().last().unwrap_or_default().to_string();
        if goal.starts_with("flaky") && self.failed_once.lock().insert(goal.clone()) {
            return Err(GenerationError::transient("502 bad gateway"));
        }
        if goal.starts_with("slow") {
            tokio::time::sleep(Duration::from_millis(400)).await;
        }
        Ok(format!("done: {goal}"))
    }

    fn provider(&self) -> &str {
        "goal"
    }
}

/// Memory store whose writes to one key never complete.
struct StallingStore {
    inner: InMemoryStore,
    stalled_key: &'static str,
}

#[async_trait]
impl MemoryStore for StallingStore {
    async fn store(&self, key: &str, value: &str) -> TacResult<()> {
        if key == self.stalled_key {
            std::future::pending::<()>().await;
        }
        self.inner.store(key, value).await
    }

    async fn retrieve(&self, key: &str) -> TacResult<Option<String>> {
        self.inner.retrieve(key).await
    }

    async fn delete(&self, key: &str) -> TacResult<bool> {
        self.inner.delete(key).await
    }

    fn backend(&self) -> &str {
        "stalling"
    }
}

async fn wait_for<F>(orch: &Orchestrator, id: TaskId, mut done: F) -> TaskStatusView
where
    F: FnMut(&TaskStatusView) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let view = orch.status(id).unwrap();
        if done(&view) {
            return view;
        }
        assert!(Instant::now() < deadline, "timed out waiting on {id}: {view:?}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn wait_terminal(orch: &Orchestrator, id: TaskId) -> TaskStatusView {
    wait_for(orch, id, |v| v.stage.is_terminal()).await
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scenario_a_third_submission_hits_queue_limit() {
    let config = OrchestratorConfig {
        task_queue_limit: 2,
        ..test_config()
    };
    let orch = engine(config, MockBackend::new(Behavior::Succeed { delay_ms: 0 }));

    orch.submit(general("one")).unwrap();
    orch.submit(general("two")).unwrap();
    let err = orch.submit(general("three")).unwrap_err();
    assert!(matches!(err, TacError::QueueFull { limit: 2 }));
    assert_eq!(orch.status_all().queue.len(), 2);
}

#[tokio::test]
async fn scenario_b_ceiling_of_one_serializes_tasks() {
    let config = OrchestratorConfig {
        max_concurrent_agents: 1,
        ..test_config()
    };
    let orch = engine(config, MockBackend::new(Behavior::Succeed { delay_ms: 100 }));
    let first = orch.submit(general("first")).unwrap();
    let second = orch.submit(general("second")).unwrap();
    orch.start().unwrap();

    let first = wait_terminal(&orch, first).await;
    let second = wait_terminal(&orch, second).await;
    assert_eq!(first.stage, TaskStage::Succeeded);
    assert_eq!(second.stage, TaskStage::Succeeded);
    assert!(second.started_at.unwrap() >= first.finished_at.unwrap());

    orch.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn scenario_c_transient_failures_exhaust_retries() {
    let config = OrchestratorConfig {
        max_task_retries: 2,
        retry_backoff: RetryBackoff::Fixed { delay_ms: 50 },
        ..test_config()
    };
    let backend = MockBackend::new(Behavior::AlwaysTransient);
    let orch = engine(config, backend.clone());
    let id = orch.submit(general("flaky")).unwrap();
    orch.start().unwrap();

    let view = wait_terminal(&orch, id).await;
    assert_eq!(view.stage, TaskStage::Failed);
    assert_eq!(view.attempts, 3);
    assert_eq!(view.max_attempts, 3);
    assert_eq!(view.error.unwrap().code, "generation_transient");
    assert!(view.result.is_none());

    let calls = backend.call_times();
    assert_eq!(calls.len(), 3);
    for pair in calls.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(50));
    }

    orch.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn scenario_d_unknown_type_fails_without_attempt_or_backoff() {
    let config = OrchestratorConfig {
        max_task_retries: 3,
        retry_backoff: RetryBackoff::Fixed { delay_ms: 5_000 },
        ..test_config()
    };
    let backend = MockBackend::new(Behavior::Succeed { delay_ms: 0 });
    let orch = engine(config, backend.clone());
    let id = orch
        .submit(TaskRequest::new("compose a sonnet").with_agent_type("poet"))
        .unwrap();
    let started = Instant::now();
    orch.start().unwrap();

    let view = wait_terminal(&orch, id).await;
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(view.stage, TaskStage::Failed);
    assert_eq!(view.attempts, 1);
    assert_eq!(view.error.unwrap().code, "unknown_worker_type");
    assert!(view.started_at.is_none());
    assert!(backend.call_times().is_empty());

    orch.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn scenario_e_shutdown_with_zero_grace_cancels_running_task() {
    let config = OrchestratorConfig {
        max_concurrent_agents: 1,
        ..test_config()
    };
    let orch = engine(config, MockBackend::new(Behavior::Succeed { delay_ms: 10_000 }));
    let running = orch.submit(general("long")).unwrap();
    let waiting = orch.submit(general("behind")).unwrap();
    orch.start().unwrap();
    wait_for(&orch, running, |v| v.stage == TaskStage::Running).await;

    orch.shutdown(Duration::ZERO).await.unwrap();

    let running = orch.status(running).unwrap();
    assert_eq!(running.stage, TaskStage::Failed);
    assert_eq!(running.error.unwrap().code, "cancelled");

    let waiting = orch.status(waiting).unwrap();
    assert_eq!(waiting.stage, TaskStage::Failed);
    assert!(waiting.started_at.is_none());
    assert_eq!(waiting.error.unwrap().code, "cancelled");

    let snapshot = orch.status_all();
    assert_eq!(snapshot.busy_workers, 0);
    assert!(snapshot
        .workers
        .iter()
        .all(|w| w.state == WorkerState::Terminating));
    assert!(matches!(
        orch.submit(general("late")),
        Err(TacError::ShuttingDown)
    ));
}

#[tokio::test]
async fn shutdown_grace_lets_running_task_finish() {
    let orch = engine(test_config(), MockBackend::new(Behavior::Succeed { delay_ms: 50 }));
    let id = orch.submit(general("quick")).unwrap();
    orch.start().unwrap();
    wait_for(&orch, id, |v| v.stage == TaskStage::Running).await;

    orch.shutdown(Duration::from_secs(1)).await.unwrap();

    let view = orch.status(id).unwrap();
    assert_eq!(view.stage, TaskStage::Succeeded);
    assert!(view.error.is_none());
    assert_eq!(view.result.as_deref(), Some("plan for: quick"));
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn busy_workers_never_exceed_ceiling() {
    let config = OrchestratorConfig {
        max_concurrent_agents: 3,
        ..test_config()
    };
    let backend = MockBackend::new(Behavior::Succeed { delay_ms: 30 });
    let orch = engine(config, backend.clone());
    orch.start().unwrap();

    let ids: Vec<TaskId> = (0..12)
        .map(|i| orch.submit(general(&format!("job {i}"))).unwrap())
        .collect();

    let deadline = Instant::now() + Duration::from_secs(10);
    while !orch.is_idle() {
        let snapshot: StatusSnapshot = orch.status_all();
        assert!(snapshot.busy_workers <= 3);
        assert!(snapshot.counts.running <= 3);
        assert!(Instant::now() < deadline, "engine never went idle");
        tokio::time::sleep(Duration::from_millis(3)).await;
    }

    for id in ids {
        assert_eq!(orch.status(id).unwrap().stage, TaskStage::Succeeded);
    }
    assert!(backend.peak.load(Ordering::SeqCst) <= 3);
    assert!(orch.status_all().workers.len() <= 3);

    orch.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn permanent_error_ends_task_on_first_attempt() {
    let config = OrchestratorConfig {
        max_task_retries: 3,
        ..test_config()
    };
    let backend = MockBackend::new(Behavior::Permanent);
    let orch = engine(config, backend.clone());
    let id = orch.submit(general("doomed")).unwrap();
    orch.start().unwrap();

    let view = wait_terminal(&orch, id).await;
    assert_eq!(view.stage, TaskStage::Failed);
    assert_eq!(view.attempts, 1);
    assert_eq!(view.error.unwrap().code, "generation_permanent");
    assert_eq!(backend.call_times().len(), 1);

    orch.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn worker_crash_is_retried_on_a_fresh_worker() {
    let config = OrchestratorConfig {
        max_task_retries: 1,
        ..test_config()
    };
    let orch = engine(config, MockBackend::new(Behavior::PanicOnFirstCall));
    let id = orch.submit(general("fragile")).unwrap();
    orch.start().unwrap();

    let view = wait_terminal(&orch, id).await;
    assert_eq!(view.stage, TaskStage::Succeeded);
    assert_eq!(view.attempts, 2);
    assert_eq!(view.result.as_deref(), Some("recovered"));
    assert_eq!(view.error.unwrap().code, "worker_crash");

    let workers = orch.status_all().workers;
    let crashed: Vec<_> = workers
        .iter()
        .filter(|w| w.state == WorkerState::Terminating)
        .collect();
    assert_eq!(crashed.len(), 1);
    assert_eq!(crashed[0].tasks_failed, 1);
    assert!(workers
        .iter()
        .any(|w| w.state == WorkerState::Idle && w.tasks_completed == 1));

    orch.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn retry_waits_in_retrying_stage() {
    let config = OrchestratorConfig {
        max_task_retries: 1,
        retry_backoff: RetryBackoff::Fixed { delay_ms: 300 },
        ..test_config()
    };
    let orch = engine(config, MockBackend::new(Behavior::AlwaysTransient));
    let id = orch.submit(general("slow retry")).unwrap();
    orch.start().unwrap();

    let view = wait_for(&orch, id, |v| v.stage == TaskStage::Retrying).await;
    assert_eq!(view.attempts, 2);
    assert!(view.retry_at.is_some());
    assert_eq!(orch.status_all().counts.retrying, 1);
    assert_eq!(orch.status_all().queue[0].stage, TaskStage::Retrying);

    let view = wait_terminal(&orch, id).await;
    assert_eq!(view.attempts, 2);

    orch.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn status_reads_are_idempotent() {
    let orch = engine(test_config(), MockBackend::new(Behavior::Succeed { delay_ms: 0 }));
    let id = orch.submit(general("stable")).unwrap();
    orch.start().unwrap();
    wait_terminal(&orch, id).await;

    let a = orch.status(id).unwrap();
    let b = orch.status(id).unwrap();
    assert_eq!(a, b);

    orch.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn results_are_written_to_memory() {
    let memory = Arc::new(InMemoryStore::new());
    let orch = Orchestrator::new(
        test_config(),
        MockBackend::new(Behavior::Succeed { delay_ms: 0 }),
        memory.clone(),
    )
    .unwrap();
    let id = orch.submit(general("remember me")).unwrap();
    orch.start().unwrap();

    let view = wait_terminal(&orch, id).await;
    let stored = memory
        .retrieve(&format!("task:{id}:result"))
        .await
        .unwrap();
    assert_eq!(stored, view.result);

    orch.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn zero_retention_evicts_finished_tasks() {
    let config = OrchestratorConfig {
        history_retention_secs: 0,
        ..test_config()
    };
    let orch = engine(config, MockBackend::new(Behavior::Succeed { delay_ms: 0 }));
    let id = orch.submit(general("ephemeral")).unwrap();
    orch.start().unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match orch.status(id) {
            Err(TacError::TaskNotFound(_)) => break,
            Ok(_) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
        assert!(Instant::now() < deadline, "task was never evicted");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    orch.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn status_snapshot_is_published_and_cleared() {
    let memory = Arc::new(InMemoryStore::new());
    let config = OrchestratorConfig {
        status_update_interval_secs: 1,
        ..test_config()
    };
    let orch = Orchestrator::new(
        config,
        MockBackend::new(Behavior::Succeed { delay_ms: 0 }),
        memory.clone(),
    )
    .unwrap();
    orch.submit(general("visible")).unwrap();
    orch.start().unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let published = loop {
        if let Some(json) = memory.retrieve("tac_controller_status").await.unwrap() {
            break json;
        }
        assert!(Instant::now() < deadline, "status never published");
        tokio::time::sleep(Duration::from_millis(10)).await;
    };
    let snapshot: StatusSnapshot = serde_json::from_str(&published).unwrap();
    assert_eq!(snapshot.max_concurrent_agents, 5);

    orch.shutdown(Duration::from_secs(1)).await.unwrap();
    assert!(memory
        .retrieve("tac_controller_status")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn retried_task_runs_after_submission_queued_during_backoff() {
    let config = OrchestratorConfig {
        max_concurrent_agents: 1,
        max_task_retries: 1,
        retry_backoff: RetryBackoff::Fixed { delay_ms: 150 },
        ..test_config()
    };
    let orch = Orchestrator::new(
        config,
        Arc::new(GoalBackend::default()),
        Arc::new(InMemoryStore::new()),
    )
    .unwrap();
    let retried = orch.submit(general("flaky job")).unwrap();
    let blocker = orch.submit(general("slow job")).unwrap();
    orch.start().unwrap();

    // The blocker holds the only worker while the flaky job backs off.
    wait_for(&orch, retried, |v| v.stage == TaskStage::Retrying).await;
    wait_for(&orch, blocker, |v| v.stage == TaskStage::Running).await;
    let fresh = orch.submit(general("fresh job")).unwrap();

    let retried = wait_terminal(&orch, retried).await;
    let fresh = wait_terminal(&orch, fresh).await;
    assert_eq!(retried.stage, TaskStage::Succeeded);
    assert_eq!(retried.attempts, 2);
    assert_eq!(fresh.stage, TaskStage::Succeeded);
    assert!(fresh.finished_at.unwrap() <= retried.started_at.unwrap());

    orch.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn stalled_status_write_does_not_block_dispatch() {
    let memory = Arc::new(StallingStore {
        inner: InMemoryStore::new(),
        stalled_key: "tac_controller_status",
    });
    let config = OrchestratorConfig {
        status_update_interval_secs: 1,
        ..test_config()
    };
    let orch = Orchestrator::new(
        config,
        MockBackend::new(Behavior::Succeed { delay_ms: 0 }),
        memory.clone(),
    )
    .unwrap();
    orch.start().unwrap();
    // Let the loop start its first status write, which never completes.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    let id = orch.submit(general("unblocked")).unwrap();
    let view = wait_terminal(&orch, id).await;
    assert_eq!(view.stage, TaskStage::Succeeded);
    assert!(started.elapsed() < Duration::from_secs(2));

    tokio::time::timeout(Duration::from_secs(2), orch.shutdown(Duration::from_secs(1)))
        .await
        .expect("shutdown must not wait on the stalled write")
        .unwrap();
    assert!(memory.retrieve("tac_controller_status").await.unwrap().is_none());
}
