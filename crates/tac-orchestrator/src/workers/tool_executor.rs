use super::{truncate_chars, TaskAssignment, Worker, WorkerContext};
use crate::types::WorkerVariant;
use async_trait::async_trait;
use std::io::Write;
use std::time::Duration;
use tac_core::TaskError;
use tracing::{debug, info};

const MAX_STDOUT_CHARS: usize = 50_000;
const MAX_STDERR_CHARS: usize = 2_000;

/// Runs a script with the configured interpreter in a child process.
///
/// The script comes from the `code` parameter or from memory under
/// `code_key`. Optional `args` (array or whitespace-separated string) are
/// passed after the script path.
pub struct ToolExecutorWorker;

#[async_trait]
impl Worker for ToolExecutorWorker {
    fn variant(&self) -> WorkerVariant {
        WorkerVariant::ToolExecutor
    }

    async fn execute(
        &self,
        task: &TaskAssignment,
        ctx: &WorkerContext,
    ) -> Result<String, TaskError> {
        let code = match task.request.param_str("code") {
            Some(code) => code.to_string(),
            None => {
                let key = task.request.param_str("code_key").ok_or_else(|| {
                    TaskError::InvalidInput("executor task needs 'code' or 'code_key'".into())
                })?;
                ctx.recall(key).await?.ok_or_else(|| {
                    TaskError::InvalidInput(format!("no code stored under '{key}'"))
                })?
            }
        };

        // Removed when dropped, on every exit path below.
        let script = write_script(task, &code)
            .map_err(|e| TaskError::Resource(format!("cannot write script: {e}")))?;

        let settings = &ctx.settings;
        let timeout = Duration::from_secs(settings.executor_timeout_secs);
        info!(
            task_id = %task.task_id,
            interpreter = %settings.interpreter,
            timeout_secs = settings.executor_timeout_secs,
            "Executing script"
        );

        let result = tokio::time::timeout(
            timeout,
            tokio::process::Command::new(&settings.interpreter)
                .arg(script.path())
                .args(args(task))
                .kill_on_drop(true)
                .output(),
        )
        .await;

        drop(script);

        let output = match result {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(TaskError::Execution(format!(
                    "failed to start '{}': {e}",
                    settings.interpreter
                )))
            }
            Err(_) => {
                return Err(TaskError::Resource(format!(
                    "script timed out after {}s",
                    settings.executor_timeout_secs
                )))
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            return Err(TaskError::Execution(format!(
                "exit code {code}: {}",
                truncate_chars(stderr.trim(), MAX_STDERR_CHARS)
            )));
        }
        if !stderr.trim().is_empty() {
            debug!(task_id = %task.task_id, stderr = %truncate_chars(&stderr, MAX_STDERR_CHARS), "Script wrote to stderr");
        }

        let stdout = truncate_chars(stdout.trim_end(), MAX_STDOUT_CHARS).to_string();
        ctx.finish(task, stdout).await
    }
}

fn write_script(task: &TaskAssignment, code: &str) -> std::io::Result<tempfile::NamedTempFile> {
    let mut script = tempfile::Builder::new()
        .prefix(&format!("tac-{}-{}-", task.task_id, task.attempt))
        .suffix(".script")
        .tempfile()?;
    script.write_all(code.as_bytes())?;
    script.flush()?;
    Ok(script)
}

fn args(task: &TaskAssignment) -> Vec<String> {
    match task.request.params.get("args") {
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Some(serde_json::Value::String(s)) => s.split_whitespace().map(str::to_string).collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::TaskRequest;
    use crate::workers::testing::{assignment, context, ScriptedBackend};
    use tac_memory::MemoryStore;

    fn shell_context() -> (WorkerContext, std::sync::Arc<tac_memory::InMemoryStore>) {
        let (mut ctx, memory) = context(ScriptedBackend::new(vec![]));
        ctx.settings.interpreter = "sh".into();
        ctx.settings.executor_timeout_secs = 1;
        (ctx, memory)
    }

    #[tokio::test]
    async fn test_runs_inline_code_with_args() {
        let (ctx, memory) = shell_context();
        let task = assignment(
            TaskRequest::new("run")
                .with_param("code", "echo \"hello $1 $2\"")
                .with_param("args", serde_json::json!(["a", 2])),
        );
        let out = ToolExecutorWorker.execute(&task, &ctx).await.unwrap();
        assert_eq!(out, "hello a 2");
        assert_eq!(
            memory.retrieve(&task.result_key()).await.unwrap().as_deref(),
            Some("hello a 2")
        );
    }

    #[tokio::test]
    async fn test_runs_code_from_memory() {
        let (ctx, memory) = shell_context();
        memory.store("tool:greeter", "echo from-memory").await.unwrap();
        let task = assignment(TaskRequest::new("run").with_param("code_key", "tool:greeter"));
        assert_eq!(
            ToolExecutorWorker.execute(&task, &ctx).await.unwrap(),
            "from-memory"
        );
    }

    #[tokio::test]
    async fn test_missing_code_is_invalid_input() {
        let (ctx, _) = shell_context();
        let no_code = assignment(TaskRequest::new("run"));
        assert!(matches!(
            ToolExecutorWorker.execute(&no_code, &ctx).await,
            Err(TaskError::InvalidInput(_))
        ));
        let bad_key = assignment(TaskRequest::new("run").with_param("code_key", "missing"));
        assert!(matches!(
            ToolExecutorWorker.execute(&bad_key, &ctx).await,
            Err(TaskError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_execution_error() {
        let (ctx, _) = shell_context();
        let task = assignment(TaskRequest::new("run").with_param("code", "echo boom >&2; exit 3"));
        let err = ToolExecutorWorker.execute(&task, &ctx).await.unwrap_err();
        match err {
            TaskError::Execution(msg) => {
                assert!(msg.contains("exit code 3"));
                assert!(msg.contains("boom"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_is_resource_error() {
        let (ctx, _) = shell_context();
        let task = assignment(TaskRequest::new("run").with_param("code", "sleep 5"));
        let err = ToolExecutorWorker.execute(&task, &ctx).await.unwrap_err();
        assert!(matches!(err, TaskError::Resource(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_script_file_is_removed_after_run() {
        let (ctx, _) = shell_context();
        let task = assignment(TaskRequest::new("run").with_param("code", "echo \"$0\""));
        let path = ToolExecutorWorker.execute(&task, &ctx).await.unwrap();
        assert!(path.ends_with(".script"));
        assert!(!std::path::Path::new(&path).exists());
    }

    #[tokio::test]
    async fn test_script_file_is_removed_after_timeout() {
        let (ctx, _) = shell_context();
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("script-path");
        let task = assignment(
            TaskRequest::new("run")
                .with_param("code", "echo \"$0\" > \"$1\"; sleep 5")
                .with_param("args", serde_json::json!([marker.display().to_string()])),
        );
        let err = ToolExecutorWorker.execute(&task, &ctx).await.unwrap_err();
        assert!(matches!(err, TaskError::Resource(_)));

        let script = std::fs::read_to_string(&marker).unwrap();
        assert!(!std::path::Path::new(script.trim()).exists());
    }

    #[test]
    fn test_args_from_string() {
        let task = assignment(TaskRequest::new("x").with_param("args", "--fast  -v"));
        assert_eq!(args(&task), vec!["--fast", "-v"]);
    }
}
