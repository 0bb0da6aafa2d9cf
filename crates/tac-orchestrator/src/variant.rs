use crate::types::{TaskRequest, WorkerVariant};
use std::collections::BTreeMap;
use tac_core::{TacError, TacResult, TaskError};

/// Hints understood without any configuration.
pub const BUILTIN_HINTS: &[(&str, WorkerVariant)] = &[
    ("default", WorkerVariant::General),
    ("general", WorkerVariant::General),
    ("browser", WorkerVariant::WebInteraction),
    ("web", WorkerVariant::WebInteraction),
    ("web_interaction", WorkerVariant::WebInteraction),
    ("tool_creator", WorkerVariant::ToolCreator),
    ("tool_executor", WorkerVariant::ToolExecutor),
    ("info_hunter", WorkerVariant::InfoHunter),
];

const RESEARCH_WORDS: [&str; 3] = ["find", "research", "gather"];

/// Maps a task's type hint to a worker variant.
#[derive(Debug, Clone)]
pub struct VariantResolver {
    table: BTreeMap<String, WorkerVariant>,
}

impl VariantResolver {
    /// Built-in table with `overrides` merged on top.
    pub fn new(overrides: &BTreeMap<String, String>) -> TacResult<Self> {
        let mut table: BTreeMap<String, WorkerVariant> = BUILTIN_HINTS
            .iter()
            .map(|(hint, v)| ((*hint).to_string(), *v))
            .collect();
        for (hint, name) in overrides {
            let variant = WorkerVariant::parse(name).ok_or_else(|| {
                TacError::Config(format!("hint '{hint}' maps to unknown variant '{name}'"))
            })?;
            table.insert(hint.trim().to_lowercase(), variant);
        }
        Ok(Self { table })
    }

    /// The effective hint table.
    pub fn table(&self) -> &BTreeMap<String, WorkerVariant> {
        &self.table
    }

    /// Pick the variant for `request`.
    ///
    /// A missing or `default` hint is inferred from the request's content.
    /// Any other hint must be in the table.
    pub fn resolve(&self, request: &TaskRequest) -> Result<WorkerVariant, TaskError> {
        let hint = request
            .agent_type
            .as_deref()
            .map(|h| h.trim().to_lowercase())
            .filter(|h| !h.is_empty());

        match hint.as_deref() {
            None | Some("default") => Ok(infer(request)),
            Some(h) => self
                .table
                .get(h)
                .copied()
                .ok_or_else(|| TaskError::UnknownWorkerType(h.to_string())),
        }
    }
}

impl Default for VariantResolver {
    fn default() -> Self {
        Self {
            table: BUILTIN_HINTS
                .iter()
                .map(|(hint, v)| ((*hint).to_string(), *v))
                .collect(),
        }
    }
}

/// Checked in order: `url`, "create" in the description, `code`/`code_key`,
/// research words.
fn infer(request: &TaskRequest) -> WorkerVariant {
    let description = request.description.to_lowercase();
    if request.has_param("url") {
        WorkerVariant::WebInteraction
    } else if description.contains("create") {
        WorkerVariant::ToolCreator
    } else if request.has_param("code") || request.has_param("code_key") {
        WorkerVariant::ToolExecutor
    } else if RESEARCH_WORDS.iter().any(|w| description.contains(w)) {
        WorkerVariant::InfoHunter
    } else {
        WorkerVariant::General
    }
}
