use async_trait::async_trait;
use std::collections::HashMap;
use tac_core::TacResult;
use tokio::sync::RwLock;

/// Key/value store shared by all workers.
///
/// Implementations must tolerate concurrent calls from many workers.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Insert or overwrite the value at `key`.
    async fn store(&self, key: &str, value: &str) -> TacResult<()>;

    /// Fetch the value at `key`. `None` means the key is not present.
    async fn retrieve(&self, key: &str) -> TacResult<Option<String>>;

    /// Remove `key`. Returns whether anything was removed.
    async fn delete(&self, key: &str) -> TacResult<bool>;

    /// Backend name, for logs.
    fn backend(&self) -> &str;
}

/// Process-local store backed by a `HashMap`.
pub struct InMemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl InMemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of keys currently stored.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// True when no key is stored.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Sorted list of stored keys.
    pub async fn keys(&self) -> Vec<String> {
        let entries = self.entries.read().await;
        let mut keys: Vec<String> = entries.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn store(&self, key: &str, value: &str) -> TacResult<()> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> TacResult<Option<String>> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> TacResult<bool> {
        let mut entries = self.entries.write().await;
        Ok(entries.remove(key).is_some())
    }

    fn backend(&self) -> &str {
        "in_memory"
    }
}
