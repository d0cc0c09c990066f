use std::collections::{HashMap, HashSet, VecDeque};

use keyrelay_common::ALL_MODELS_MARKER;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct PoolEntry {
    pub credential_id: i64,
    pub token: String,
}

/// One `refresh()` source row, as returned by the durable store.
#[derive(Debug, Clone)]
pub struct PoolRow {
    pub instance: String,
    pub model: String,
    pub credential_id: i64,
    pub token: String,
}

type QueueKey = (String, String);

/// The in-memory credential pool of §4.5: one rotation queue per
/// `(instance, model_or_sentinel)`, replaced wholesale on `refresh`.
pub struct CredentialPool {
    queues: RwLock<HashMap<QueueKey, VecDeque<PoolEntry>>>,
    shared_key_status: RwLock<HashSet<String>>,
}

impl CredentialPool {
    pub fn new() -> Self {
        Self { queues: RwLock::new(HashMap::new()), shared_key_status: RwLock::new(HashSet::new()) }
    }

    /// Synchronous startup population: records which instances are enabled
    /// and use shared key status, so `acquire`/`evict` know which queue key
    /// to address before the first `refresh()` completes.
    pub fn populate_token_map(&mut self, shared_key_status_instances: impl IntoIterator<Item = String>) {
        self.shared_key_status = RwLock::new(shared_key_status_instances.into_iter().collect());
    }

    /// Replaces the entire pool atomically from a fresh snapshot.
    pub async fn refresh(&self, rows: Vec<PoolRow>) {
        let mut queues: HashMap<QueueKey, VecDeque<PoolEntry>> = HashMap::new();
        for row in rows {
            queues.entry((row.instance, row.model)).or_default().push_back(PoolEntry {
                credential_id: row.credential_id,
                token: row.token,
            });
        }
        *self.queues.write().await = queues;
    }

    async fn queue_key(&self, instance: &str, model: &str) -> QueueKey {
        if self.shared_key_status.read().await.contains(instance) {
            (instance.to_string(), ALL_MODELS_MARKER.to_string())
        } else {
            (instance.to_string(), model.to_string())
        }
    }

    /// Pops the front entry, appends it to the back, and returns the first
    /// entry not in `exclude_ids`. Rotation still happens for skipped
    /// entries, preserving "head is next to serve" across calls.
    pub async fn acquire(&self, instance: &str, model: &str, exclude_ids: &HashSet<i64>) -> Option<PoolEntry> {
        let key = self.queue_key(instance, model).await;
        let mut queues = self.queues.write().await;
        let queue = queues.get_mut(&key)?;

        let len = queue.len();
        for _ in 0..len {
            let entry = queue.pop_front()?;
            queue.push_back(entry.clone());
            if !exclude_ids.contains(&entry.credential_id) {
                return Some(entry);
            }
        }
        None
    }

    /// Removes every occurrence of `credential_id` from the relevant queue.
    pub async fn evict(&self, instance: &str, model: &str, credential_id: i64) {
        let key = self.queue_key(instance, model).await;
        let mut queues = self.queues.write().await;
        if let Some(queue) = queues.get_mut(&key) {
            queue.retain(|entry| entry.credential_id != credential_id);
        }
    }
}

impl Default for CredentialPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(instance: &str, model: &str, id: i64) -> PoolRow {
        PoolRow { instance: instance.to_string(), model: model.to_string(), credential_id: id, token: format!("tok-{id}") }
    }

    #[tokio::test]
    async fn acquire_rotates_and_skips_excluded() {
        let pool = CredentialPool::new();
        pool.refresh(vec![row("openai", "gpt-4o", 1), row("openai", "gpt-4o", 2), row("openai", "gpt-4o", 3)]).await;

        let first = pool.acquire("openai", "gpt-4o", &HashSet::new()).await.unwrap();
        assert_eq!(first.credential_id, 1);
        let second = pool.acquire("openai", "gpt-4o", &HashSet::new()).await.unwrap();
        assert_eq!(second.credential_id, 2);

        let mut exclude = HashSet::new();
        exclude.insert(3);
        exclude.insert(1);
        let third = pool.acquire("openai", "gpt-4o", &exclude).await.unwrap();
        assert_eq!(third.credential_id, 2);
    }

    #[tokio::test]
    async fn evict_removes_every_occurrence() {
        let pool = CredentialPool::new();
        pool.refresh(vec![row("openai", "gpt-4o", 1), row("openai", "gpt-4o", 2)]).await;
        pool.evict("openai", "gpt-4o", 1).await;
        let entry = pool.acquire("openai", "gpt-4o", &HashSet::new()).await.unwrap();
        assert_eq!(entry.credential_id, 2);
        let entry = pool.acquire("openai", "gpt-4o", &HashSet::new()).await.unwrap();
        assert_eq!(entry.credential_id, 2);
    }

    #[tokio::test]
    async fn shared_key_status_ignores_model_argument() {
        let mut pool = CredentialPool::new();
        pool.populate_token_map(["gemini-cli".to_string()]);
        pool.refresh(vec![row("gemini-cli", ALL_MODELS_MARKER, 7)]).await;

        let entry = pool.acquire("gemini-cli", "gemini-2.0-flash", &HashSet::new()).await.unwrap();
        assert_eq!(entry.credential_id, 7);
    }

    #[tokio::test]
    async fn acquire_returns_none_when_all_excluded() {
        let pool = CredentialPool::new();
        pool.refresh(vec![row("openai", "gpt-4o", 1)]).await;
        let mut exclude = HashSet::new();
        exclude.insert(1);
        assert!(pool.acquire("openai", "gpt-4o", &exclude).await.is_none());
    }
}
