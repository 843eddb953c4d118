//! In-memory [`KvStore`] backend.
//!
//! All state lives behind one `RwLock`, so every batch commit is trivially
//! atomic. Used in tests and for `backend = "memory"` deployments where
//! durability is not required.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::{KvStore, WriteBatch, WriteOp};

#[derive(Default)]
struct Inner {
    values: BTreeMap<String, String>,
    lists: HashMap<String, Vec<String>>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.read().await.values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.inner
            .write()
            .await
            .values
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn range(&self, key: &str, start: usize, limit: usize) -> Result<Vec<String>> {
        let inner = self.inner.read().await;
        Ok(inner
            .lists
            .get(key)
            .map(|list| list.iter().skip(start).take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn list_len(&self, key: &str) -> Result<usize> {
        Ok(self.inner.read().await.lists.get(key).map_or(0, Vec::len))
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let inner = self.inner.read().await;
        Ok(inner
            .values
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<bool> {
        let mut inner = self.inner.write().await;

        let stale = batch
            .guards
            .iter()
            .any(|guard| inner.values.get(&guard.key) != guard.expected.as_ref());
        if stale {
            return Ok(false);
        }

        for op in batch.ops {
            match op {
                WriteOp::Set { key, value } => {
                    inner.values.insert(key, value);
                }
                WriteOp::Append { key, value } => {
                    inner.lists.entry(key).or_default().push(value);
                }
                WriteOp::Delete { key } => {
                    inner.values.remove(&key);
                    inner.lists.remove(&key);
                }
            }
        }
        Ok(true)
    }

    fn name(&self) -> &str {
        "memory"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_set() {
        let store = MemoryStore::new();
        assert!(store.get("k").await.unwrap().is_none());
        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_commit_applies_all_ops() {
        let store = MemoryStore::new();
        store.set("gone", "x").await.unwrap();

        let batch = WriteBatch::new()
            .set("a", "1")
            .append("l", "first")
            .append("l", "second")
            .delete("gone");
        assert!(store.commit(batch).await.unwrap());

        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.range("l", 0, 10).await.unwrap(), vec!["first", "second"]);
        assert_eq!(store.list_len("l").await.unwrap(), 2);
        assert!(store.get("gone").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_guard_rejects_stale_batch() {
        let store = MemoryStore::new();
        store.set("bets", "v2").await.unwrap();

        let stale = WriteBatch::new()
            .guarded("bets", Some("v1".into()))
            .set("bets", "v3")
            .set("balance", "120");
        assert!(!store.commit(stale).await.unwrap());
        assert_eq!(store.get("bets").await.unwrap().as_deref(), Some("v2"));
        assert!(store.get("balance").await.unwrap().is_none());

        let fresh = WriteBatch::new()
            .guarded("bets", Some("v2".into()))
            .set("bets", "v3");
        assert!(store.commit(fresh).await.unwrap());
    }

    #[tokio::test]
    async fn test_every_guard_must_hold() {
        let store = MemoryStore::new();
        store.set("bets", "v1").await.unwrap();
        store.set("balance", "80").await.unwrap();

        let batch = WriteBatch::new()
            .guarded("bets", Some("v1".into()))
            .guarded("balance", Some("90".into()))
            .set("bets", "v2")
            .set("balance", "108");
        assert!(!store.commit(batch).await.unwrap());
        assert_eq!(store.get("bets").await.unwrap().as_deref(), Some("v1"));
        assert_eq!(store.get("balance").await.unwrap().as_deref(), Some("80"));
    }

    #[tokio::test]
    async fn test_guard_on_absent_key() {
        let store = MemoryStore::new();
        let batch = WriteBatch::new().guarded("k", None).set("k", "1");
        assert!(store.commit(batch.clone()).await.unwrap());
        assert!(!store.commit(batch).await.unwrap());
    }

    #[tokio::test]
    async fn test_keys_by_prefix() {
        let store = MemoryStore::new();
        store.set("pending_user_bet:b2", "u1").await.unwrap();
        store.set("pending_user_bet:b1", "u2").await.unwrap();
        store.set("user:u1:bets", "[]").await.unwrap();

        let keys = store.keys("pending_user_bet:").await.unwrap();
        assert_eq!(keys, vec!["pending_user_bet:b1", "pending_user_bet:b2"]);
    }

    #[tokio::test]
    async fn test_range_window() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .commit(WriteBatch::new().append("h", i.to_string()))
                .await
                .unwrap();
        }
        assert_eq!(store.range("h", 3, 10).await.unwrap(), vec!["3", "4"]);
        assert!(store.range("missing", 0, 10).await.unwrap().is_empty());
    }
}
