use crate::types::WorkerVariant;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tac_core::{TacError, TacResult};

/// Delay between a failed attempt and the task's next eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum RetryBackoff {
    /// The same delay after every failed attempt.
    Fixed { delay_ms: u64 },
    /// `base_ms * 2^(n-1)` after failed attempt `n`, capped at `max_ms`.
    Exponential { base_ms: u64, max_ms: u64 },
}

impl Default for RetryBackoff {
    fn default() -> Self {
        RetryBackoff::Exponential {
            base_ms: 500,
            max_ms: 30_000,
        }
    }
}

impl RetryBackoff {
    /// Delay applied after the given failed attempt (1-based).
    pub fn delay_for(&self, failed_attempt: u32) -> Duration {
        let ms = match *self {
            RetryBackoff::Fixed { delay_ms } => delay_ms,
            RetryBackoff::Exponential { base_ms, max_ms } => {
                let exp = failed_attempt.saturating_sub(1).min(63);
                base_ms
                    .saturating_mul(2u64.saturating_pow(exp))
                    .min(max_ms)
            }
        };
        Duration::from_millis(ms)
    }
}

/// `[workers]` section: knobs for the worker variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Where tool_creator writes scripts that carry a `filename`.
    #[serde(default)]
    pub tool_output_dir: Option<PathBuf>,
    /// Program that runs tool_executor scripts.
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    /// Wall-clock limit for one script run.
    #[serde(default = "default_executor_timeout_secs")]
    pub executor_timeout_secs: u64,
    /// HTTP timeout for web_interaction fetches.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Page text beyond this many characters is cut before summarizing.
    #[serde(default = "default_max_page_chars")]
    pub max_page_chars: usize,
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_executor_timeout_secs() -> u64 {
    30
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_max_page_chars() -> usize {
    20_000
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            tool_output_dir: None,
            interpreter: default_interpreter(),
            executor_timeout_secs: default_executor_timeout_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_page_chars: default_max_page_chars(),
        }
    }
}

/// `[orchestrator]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Most tasks that may be queued or retrying at once.
    #[serde(default = "default_task_queue_limit")]
    pub task_queue_limit: usize,
    /// Ceiling on live workers.
    #[serde(default = "default_max_concurrent_agents")]
    pub max_concurrent_agents: usize,
    /// Attempts allowed beyond the first.
    #[serde(default = "default_max_task_retries")]
    pub max_task_retries: u32,
    /// Reuse idle workers; when false every dispatch gets a fresh worker.
    #[serde(default = "default_true")]
    pub recycle_workers: bool,
    /// Upper bound on how long the loop sleeps without an event.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Default grace period for the CLI's shutdown.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    /// 0 disables publishing the status snapshot to memory.
    #[serde(default = "default_status_update_interval_secs")]
    pub status_update_interval_secs: u64,
    /// Memory key for the published status snapshot.
    #[serde(default = "default_status_memory_key")]
    pub status_memory_key: String,
    /// 0 evicts terminal tasks on the next sweep.
    #[serde(default = "default_history_retention_secs")]
    pub history_retention_secs: u64,
    /// Most terminal tasks kept in the registry.
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    /// Delay before a failed attempt is retried.
    #[serde(default)]
    pub retry_backoff: RetryBackoff,
    /// Extra or overriding hint → variant entries.
    #[serde(default)]
    pub worker_variant_map: BTreeMap<String, String>,
}

fn default_task_queue_limit() -> usize {
    100
}

fn default_max_concurrent_agents() -> usize {
    5
}

fn default_max_task_retries() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_tick_ms() -> u64 {
    200
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

fn default_status_update_interval_secs() -> u64 {
    5
}

fn default_status_memory_key() -> String {
    "tac_controller_status".to_string()
}

fn default_history_retention_secs() -> u64 {
    300
}

fn default_max_history() -> usize {
    50
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            task_queue_limit: default_task_queue_limit(),
            max_concurrent_agents: default_max_concurrent_agents(),
            max_task_retries: default_max_task_retries(),
            recycle_workers: true,
            tick_ms: default_tick_ms(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            status_update_interval_secs: default_status_update_interval_secs(),
            status_memory_key: default_status_memory_key(),
            history_retention_secs: default_history_retention_secs(),
            max_history: default_max_history(),
            retry_backoff: RetryBackoff::default(),
            worker_variant_map: BTreeMap::new(),
        }
    }
}

impl OrchestratorConfig {
    /// Total attempts a task may consume.
    pub fn max_attempts(&self) -> u32 {
        self.max_task_retries.saturating_add(1)
    }

    /// Loop wake-up interval.
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// `shutdown_grace_secs` as a duration.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// How long terminal tasks stay visible.
    pub fn history_retention(&self) -> Duration {
        Duration::from_secs(self.history_retention_secs)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> TacResult<()> {
        if self.task_queue_limit == 0 {
            return Err(TacError::Config(
                "task_queue_limit must be greater than 0".into(),
            ));
        }
        if self.max_concurrent_agents == 0 {
            return Err(TacError::Config(
                "max_concurrent_agents must be greater than 0".into(),
            ));
        }
        if self.tick_ms == 0 {
            return Err(TacError::Config("tick_ms must be greater than 0".into()));
        }
        if let RetryBackoff::Exponential { base_ms, max_ms } = self.retry_backoff {
            if base_ms > max_ms {
                return Err(TacError::Config(format!(
                    "retry_backoff.base_ms ({base_ms}) exceeds max_ms ({max_ms})"
                )));
            }
        }
        if self.status_update_interval_secs > 0 && self.status_memory_key.trim().is_empty() {
            return Err(TacError::Config("status_memory_key must not be empty".into()));
        }
        for (hint, variant) in &self.worker_variant_map {
            if WorkerVariant::parse(variant).is_none() {
                return Err(TacError::Config(format!(
                    "worker_variant_map entry '{hint}' names unknown variant '{variant}'"
                )));
            }
        }
        Ok(())
    }
}
