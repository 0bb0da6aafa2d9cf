use crate::embedding::{cosine_similarity, EmbeddingProvider};
use crate::store::MemoryStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tac_core::{TacError, TacResult};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VectorEntry {
    key: String,
    value: String,
    embedding: Vec<f32>,
    updated_at: DateTime<Utc>,
    /// Tombstone written when a key is deleted from an append-only log.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    deleted: bool,
}

/// A similarity search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Key the value was stored under.
    pub key: String,
    /// Stored value.
    pub value: String,
    /// Cosine similarity to the query, higher is closer.
    pub score: f32,
}

/// Key/value store that also indexes every value for similarity search.
///
/// With a path, entries are persisted as JSON lines: `store` appends, a delete
/// appends a tombstone, and on load the last line for a key wins.
pub struct VectorMemoryStore {
    embedder: Arc<dyn EmbeddingProvider>,
    entries: RwLock<HashMap<String, VectorEntry>>,
    path: Option<PathBuf>,
}

impl VectorMemoryStore {
    /// Volatile store with no backing file.
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            entries: RwLock::new(HashMap::new()),
            path: None,
        }
    }

    /// Store persisted to a JSONL log at `path`, replaying it if present.
    pub async fn open(embedder: Arc<dyn EmbeddingProvider>, path: PathBuf) -> TacResult<Self> {
        let mut entries = HashMap::new();

        if path.exists() {
            let data = tokio::fs::read_to_string(&path).await.map_err(|e| {
                TacError::Memory(format!("failed to read {}: {e}", path.display()))
            })?;
            for (lineno, line) in data.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let entry: VectorEntry = serde_json::from_str(line).map_err(|e| {
                    TacError::Memory(format!(
                        "invalid entry at {}:{}: {e}",
                        path.display(),
                        lineno + 1
                    ))
                })?;
                if entry.deleted {
                    entries.remove(&entry.key);
                } else {
                    entries.insert(entry.key.clone(), entry);
                }
            }
        } else if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                TacError::Memory(format!("failed to create {}: {e}", parent.display()))
            })?;
        }

        info!(path = %path.display(), entries = entries.len(), "Opened vector memory store");

        Ok(Self {
            embedder,
            entries: RwLock::new(entries),
            path: Some(path),
        })
    }

    /// Return up to `top_k` entries ranked by similarity to `query`.
    ///
    /// Entries with a zero score are left out.
    pub async fn search(&self, query: &str, top_k: usize) -> TacResult<Vec<SearchHit>> {
        let query_vec = self.embedder.embed(query).await?;
        let entries = self.entries.read().await;

        let mut hits: Vec<SearchHit> = entries
            .values()
            .map(|e| SearchHit {
                key: e.key.clone(),
                value: e.value.clone(),
                score: cosine_similarity(&query_vec, &e.embedding),
            })
            .filter(|h| h.score > 0.0)
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.key.cmp(&b.key))
        });
        hits.truncate(top_k);
        debug!(query, hits = hits.len(), "Vector search");
        Ok(hits)
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// True when nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    async fn append(&self, entry: &VectorEntry) -> TacResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| TacError::Memory(format!("failed to open {}: {e}", path.display())))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| TacError::Memory(format!("failed to append {}: {e}", path.display())))?;
        Ok(())
    }
}

#[async_trait]
impl MemoryStore for VectorMemoryStore {
    async fn store(&self, key: &str, value: &str) -> TacResult<()> {
        let embedding = self.embedder.embed(value).await?;
        let entry = VectorEntry {
            key: key.to_string(),
            value: value.to_string(),
            embedding,
            updated_at: Utc::now(),
            deleted: false,
        };
        let mut entries = self.entries.write().await;
        self.append(&entry).await?;
        entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> TacResult<Option<String>> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).map(|e| e.value.clone()))
    }

    async fn delete(&self, key: &str) -> TacResult<bool> {
        let mut entries = self.entries.write().await;
        if !entries.contains_key(key) {
            return Ok(false);
        }
        self.append(&VectorEntry {
            key: key.to_string(),
            value: String::new(),
            embedding: Vec::new(),
            updated_at: Utc::now(),
            deleted: true,
        })
        .await?;
        entries.remove(key);
        Ok(true)
    }

    fn backend(&self) -> &str {
        "vector"
    }
}
