use super::{truncate_chars, TaskAssignment, Worker, WorkerContext};
use crate::types::WorkerVariant;
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use tac_agent::GenerationParams;
use tac_core::TaskError;
use tracing::info;

#[allow(clippy::expect_used)]
static SCRIPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b.*?</script\s*>").expect("valid regex"));

#[allow(clippy::expect_used)]
static STYLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style\b.*?</style\s*>").expect("valid regex"));

#[allow(clippy::expect_used)]
static COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid regex"));

#[allow(clippy::expect_used)]
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"));

#[allow(clippy::expect_used)]
static SPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Fetches a page and either extracts its text or summarizes it.
///
/// Parameters: `url` (required, http/https) and `action` (`extract` or
/// `summarize`). Without an action, a task with a description is summarized
/// against it and one without is extracted.
pub struct WebWorker;

#[async_trait]
impl Worker for WebWorker {
    fn variant(&self) -> WorkerVariant {
        WorkerVariant::WebInteraction
    }

    async fn execute(
        &self,
        task: &TaskAssignment,
        ctx: &WorkerContext,
    ) -> Result<String, TaskError> {
        let raw_url = task
            .request
            .param_str("url")
            .ok_or_else(|| TaskError::InvalidInput("web task requires a 'url'".into()))?;
        let url = reqwest::Url::parse(raw_url)
            .map_err(|e| TaskError::InvalidInput(format!("invalid url '{raw_url}': {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(TaskError::InvalidInput(format!(
                "unsupported scheme '{}', only http/https",
                url.scheme()
            )));
        }

        info!(task_id = %task.task_id, url = %url, "Fetching page");
        let response = ctx
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| TaskError::Resource(format!("fetch of {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let msg = format!("{url} returned HTTP {status}");
            return Err(match status.as_u16() {
                408 | 429 | 500..=599 => TaskError::Resource(msg),
                _ => TaskError::InvalidInput(msg),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| TaskError::Resource(format!("reading body of {url} failed: {e}")))?;
        let text = html_to_text(&body);
        let text = truncate_chars(&text, ctx.settings.max_page_chars);
        ctx.remember(&task.key("page"), text).await?;

        let goal = task.request.description.trim();
        let summarize = match task.request.param_str("action") {
            Some("summarize") => true,
            Some("extract") => false,
            Some(other) => {
                return Err(TaskError::InvalidInput(format!(
                    "unknown web action '{other}'"
                )))
            }
            None => !goal.is_empty(),
        };

        let output = if summarize {
            let focus = if goal.is_empty() {
                "Summarize the page."
            } else {
                goal
            };
            let prompt = format!("{focus}\n\nPage content from {url}:\n\n{text}");
            ctx.generate(
                &prompt,
                &GenerationParams::default()
                    .with_system("You summarize web pages accurately and concisely."),
            )
            .await?
        } else {
            text.to_string()
        };

        ctx.finish(task, output).await
    }
}

/// Strip markup down to readable text.
pub(crate) fn html_to_text(html: &str) -> String {
    let text = SCRIPT_RE.replace_all(html, " ");
    let text = STYLE_RE.replace_all(&text, " ");
    let text = COMMENT_RE.replace_all(&text, " ");
    let text = TAG_RE.replace_all(&text, " ");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    SPACE_RE.replace_all(&text, " ").trim().to_string()
}
