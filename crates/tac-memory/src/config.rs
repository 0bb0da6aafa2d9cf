use crate::embedding::LocalEmbedding;
use crate::file::JsonFileStore;
use crate::store::{InMemoryStore, MemoryStore};
use crate::vector::VectorMemoryStore;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tac_core::{TacError, TacResult};
use tracing::info;

/// Which [`MemoryStore`] implementation backs the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryBackendKind {
    /// Process-local map; lost on exit.
    #[default]
    InMemory,
    /// [`JsonFileStore`](crate::JsonFileStore) at `path`.
    JsonFile,
    /// [`VectorStore`](crate::VectorStore) with local embeddings.
    Vector,
}

impl std::fmt::Display for MemoryBackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::InMemory => "in_memory",
            Self::JsonFile => "json_file",
            Self::Vector => "vector",
        };
        f.write_str(name)
    }
}

/// `[memory]` configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Store implementation.
    #[serde(default)]
    pub backend: MemoryBackendKind,
    /// Required for `json_file`; optional for `vector`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Length of the local embedding vectors.
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,
}

fn default_embedding_dimension() -> usize {
    LocalEmbedding::DEFAULT_DIMENSION
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: MemoryBackendKind::default(),
            path: None,
            embedding_dimension: default_embedding_dimension(),
        }
    }
}

/// Resolve the configured backend into a shared store. Called once at startup.
pub async fn build_store(config: &MemoryConfig) -> TacResult<Arc<dyn MemoryStore>> {
    let store: Arc<dyn MemoryStore> = match config.backend {
        MemoryBackendKind::InMemory => Arc::new(InMemoryStore::new()),
        MemoryBackendKind::JsonFile => {
            let path = config.path.clone().ok_or_else(|| {
                TacError::Config("memory backend json_file requires `path`".into())
            })?;
            Arc::new(JsonFileStore::open(path).await?)
        }
        MemoryBackendKind::Vector => {
            if config.embedding_dimension == 0 {
                return Err(TacError::Config(
                    "memory.embedding_dimension must be greater than 0".into(),
                ));
            }
            let embedder = Arc::new(LocalEmbedding::new(config.embedding_dimension));
            match &config.path {
                Some(path) => Arc::new(VectorMemoryStore::open(embedder, path.clone()).await?),
                None => Arc::new(VectorMemoryStore::new(embedder)),
            }
        }
    };
    info!(backend = store.backend(), "Memory backend ready");
    Ok(store)
}
