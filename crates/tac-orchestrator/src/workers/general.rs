use super::{TaskAssignment, Worker, WorkerContext};
use crate::types::WorkerVariant;
use async_trait::async_trait;
use tac_agent::GenerationParams;
use tac_core::TaskError;
use tracing::info;

const PLANNER_PROMPT: &str =
    "You are a meticulous planner. Reply with a short numbered list of concrete steps.";

/// Turns a free-text goal into a step-by-step plan.
///
/// A `depends_on_key` parameter pulls a prerequisite result from memory into
/// the prompt. If the key is not there yet the attempt fails as a resource
/// error so the retry policy can wait for the producer.
pub struct GeneralWorker;

#[async_trait]
impl Worker for GeneralWorker {
    fn variant(&self) -> WorkerVariant {
        WorkerVariant::General
    }

    async fn execute(
        &self,
        task: &TaskAssignment,
        ctx: &WorkerContext,
    ) -> Result<String, TaskError> {
        let goal = task.request.description.trim();
        if goal.is_empty() {
            return Err(TaskError::InvalidInput("task has no description".into()));
        }

        let mut prompt = format!("Create a step-by-step plan for this task:\n\n{goal}");
        if let Some(key) = task.request.param_str("depends_on_key") {
            let prior = ctx.recall(key).await?.ok_or_else(|| {
                TaskError::Resource(format!("dependency '{key}' is not in memory yet"))
            })?;
            prompt.push_str(&format!("\n\nOutput of the prerequisite task:\n{prior}"));
        }

        let plan = ctx
            .generate(&prompt, &GenerationParams::default().with_system(PLANNER_PROMPT))
            .await?;
        ctx.remember(&task.key("plan"), &plan).await?;
        info!(task_id = %task.task_id, chars = plan.len(), "Plan generated");

        ctx.finish(task, plan).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::TaskRequest;
    use crate::workers::testing::{assignment, context, ScriptedBackend};
    use tac_core::GenerationError;
    use tac_memory::MemoryStore;

    #[tokio::test]
    async fn test_plan_is_stored() {
        let backend = ScriptedBackend::new(vec![Ok("1. a\n2. b".into())]);
        let (ctx, memory) = context(backend);
        let task = assignment(TaskRequest::new("Organize a meetup"));

        let out = GeneralWorker.execute(&task, &ctx).await.unwrap();
        assert_eq!(out, "1. a\n2. b");
        assert_eq!(
            memory.retrieve(&task.key("plan")).await.unwrap().as_deref(),
            Some("1. a\n2. b")
        );
        assert_eq!(
            memory.retrieve(&task.result_key()).await.unwrap().as_deref(),
            Some("1. a\n2. b")
        );
    }

    #[tokio::test]
    async fn test_dependency_is_included() {
        let backend = ScriptedBackend::new(vec![Ok("plan".into())]);
        let (ctx, memory) = context(backend.clone());
        memory.store("previous_result", "venue list").await.unwrap();
        let task = assignment(
            TaskRequest::new("Pick a venue").with_param("depends_on_key", "previous_result"),
        );

        GeneralWorker.execute(&task, &ctx).await.unwrap();
        assert!(backend.prompts.lock()[0].contains("venue list"));
    }

    #[tokio::test]
    async fn test_missing_dependency_is_retryable() {
        let (ctx, _) = context(ScriptedBackend::new(vec![]));
        let task = assignment(TaskRequest::new("x").with_param("depends_on_key", "nope"));
        let err = GeneralWorker.execute(&task, &ctx).await.unwrap_err();
        assert!(matches!(err, TaskError::Resource(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_generation_error_passes_through() {
        let backend = ScriptedBackend::new(vec![Err(GenerationError::transient("429"))]);
        let (ctx, _) = context(backend);
        let err = GeneralWorker
            .execute(&assignment(TaskRequest::new("x")), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Generation(ref g) if g.is_transient()));
    }
}
