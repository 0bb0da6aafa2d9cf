use crate::store::MemoryStore;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tac_core::{TacError, TacResult};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Durable key/value store persisted as one pretty-printed JSON object.
///
/// All entries live in memory; every mutation rewrites the file through a
/// temporary sibling and an atomic rename. The write lock is held across the
/// rewrite so the file always reflects a complete state. A mutation whose
/// rewrite fails is undone in memory as well.
pub struct JsonFileStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Open the store at `path`, loading existing entries.
    ///
    /// A file that cannot be decoded is logged and replaced by an empty store
    /// on the next write.
    pub async fn open(path: PathBuf) -> TacResult<Self> {
        let entries = if path.exists() {
            let data = tokio::fs::read_to_string(&path).await.map_err(|e| {
                TacError::Memory(format!("failed to read {}: {e}", path.display()))
            })?;
            match serde_json::from_str::<BTreeMap<String, String>>(&data) {
                Ok(map) => map,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Could not decode memory file, starting empty");
                    BTreeMap::new()
                }
            }
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    TacError::Memory(format!("failed to create {}: {e}", parent.display()))
                })?;
            }
            BTreeMap::new()
        };

        info!(path = %path.display(), entries = entries.len(), "Opened JSON memory store");

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    async fn persist(&self, entries: &BTreeMap<String, String>) -> TacResult<()> {
        let data = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data.as_bytes())
            .await
            .map_err(|e| TacError::Memory(format!("failed to write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            TacError::Memory(format!("failed to replace {}: {e}", self.path.display()))
        })?;
        Ok(())
    }
}

#[async_trait]
impl MemoryStore for JsonFileStore {
    async fn store(&self, key: &str, value: &str) -> TacResult<()> {
        let mut entries = self.entries.write().await;
        let previous = entries.insert(key.to_string(), value.to_string());
        if let Err(e) = self.persist(&entries).await {
            match previous {
                Some(old) => entries.insert(key.to_string(), old),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> TacResult<Option<String>> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> TacResult<bool> {
        let mut entries = self.entries.write().await;
        let Some(old) = entries.remove(key) else {
            return Ok(false);
        };
        if let Err(e) = self.persist(&entries).await {
            entries.insert(key.to_string(), old);
            return Err(e);
        }
        Ok(true)
    }

    fn backend(&self) -> &str {
        "json_file"
    }
}
