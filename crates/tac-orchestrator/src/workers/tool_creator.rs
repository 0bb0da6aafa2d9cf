use super::{TaskAssignment, Worker, WorkerContext};
use crate::types::WorkerVariant;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tac_agent::GenerationParams;
use tac_core::TaskError;
use tracing::info;

const CODER_PROMPT: &str =
    "You are an expert Python programmer generating executable scripts from descriptions.";

/// Generates a self-contained script from a description.
///
/// The script is stored under `tool:<slug>` so a later tool_executor task
/// can run it through `code_key`. With a `filename` parameter it is also
/// written into the configured output directory.
pub struct ToolCreatorWorker;

#[async_trait]
impl Worker for ToolCreatorWorker {
    fn variant(&self) -> WorkerVariant {
        WorkerVariant::ToolCreator
    }

    async fn execute(
        &self,
        task: &TaskAssignment,
        ctx: &WorkerContext,
    ) -> Result<String, TaskError> {
        let description = task.request.description.trim();
        if description.is_empty() {
            return Err(TaskError::InvalidInput(
                "tool creation requires a description".into(),
            ));
        }

        let prompt = format!(
            "Write a complete, self-contained Python script for the task below. \
             Include all imports and a `if __name__ == \"__main__\":` entry point. \
             Reply with code only.\n\nTask: {description}"
        );
        let params = GenerationParams {
            temperature: Some(0.5),
            ..GenerationParams::default()
        }
        .with_system(CODER_PROMPT)
        .with_max_tokens(1500);

        let reply = ctx.generate(&prompt, &params).await?;
        let code = strip_code_fences(&reply);
        if code.is_empty() {
            return Err(TaskError::Generation(tac_core::GenerationError::transient(
                "backend returned no code",
            )));
        }

        let key = format!("tool:{}", slug(description));
        ctx.remember(&key, code).await?;

        if let Some(filename) = task.request.param_str("filename") {
            let dir = ctx
                .settings
                .tool_output_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from("."));
            let path = output_path(&dir, filename)?;
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| TaskError::Resource(format!("cannot create {}: {e}", dir.display())))?;
            tokio::fs::write(&path, code)
                .await
                .map_err(|e| TaskError::Resource(format!("cannot write {}: {e}", path.display())))?;
            info!(task_id = %task.task_id, path = %path.display(), "Tool saved");
        }

        info!(task_id = %task.task_id, key = %key, "Tool generated");
        ctx.finish(task, code.to_string()).await
    }
}

/// Remove a surrounding markdown code fence, if any.
pub(crate) fn strip_code_fences(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag line.
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Memory-key friendly form of a description.
pub(crate) fn slug(text: &str) -> String {
    let mut out = String::new();
    for c in text.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('_') && !out.is_empty() {
            out.push('_');
        }
        if out.len() >= 40 {
            break;
        }
    }
    out.trim_end_matches('_').to_string()
}

fn output_path(dir: &Path, filename: &str) -> Result<PathBuf, TaskError> {
    let name = Path::new(filename);
    let bare = name.file_name().is_some_and(|f| f == name.as_os_str());
    if !bare || filename == ".." || filename == "." {
        return Err(TaskError::InvalidInput(format!(
            "filename '{filename}' must be a bare file name"
        )));
    }
    Ok(dir.join(name))
}
