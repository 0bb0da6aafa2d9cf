use super::{TaskAssignment, Worker, WorkerContext};
use crate::types::WorkerVariant;
use async_trait::async_trait;
use tac_agent::GenerationParams;
use tac_core::TaskError;
use tracing::info;

/// Research in two passes: a search plan, then a synthesized report.
pub struct InfoHunterWorker;

#[async_trait]
impl Worker for InfoHunterWorker {
    fn variant(&self) -> WorkerVariant {
        WorkerVariant::InfoHunter
    }

    async fn execute(
        &self,
        task: &TaskAssignment,
        ctx: &WorkerContext,
    ) -> Result<String, TaskError> {
        let query = task
            .request
            .param_str("query")
            .unwrap_or_else(|| task.request.description.trim());
        if query.is_empty() {
            return Err(TaskError::InvalidInput(
                "research task needs a 'query' or description".into(),
            ));
        }

        let plan = ctx
            .generate(
                &format!(
                    "Create a concise search plan to find information about: '{query}'. \
                     List keywords, likely sources and the kinds of facts to look for."
                ),
                &GenerationParams::default().with_system("You are a research planning assistant."),
            )
            .await?;
        ctx.remember(&task.key("search_plan"), &plan).await?;

        let report = ctx
            .generate(
                &format!(
                    "Using this search plan, write a concise report answering '{query}'.\n\n\
                     SEARCH PLAN:\n{plan}\n\nREPORT:"
                ),
                &GenerationParams::default()
                    .with_system("You are a research synthesis assistant.")
                    .with_max_tokens(1500),
            )
            .await?;

        info!(task_id = %task.task_id, chars = report.len(), "Research report ready");
        ctx.finish(task, report).await
    }
}
