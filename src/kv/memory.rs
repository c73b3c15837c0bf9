//! In-memory KV backend
//!
//! Linearizable by construction (one mutex around the map). Used for tests,
//! embedding and the `memory` backend of the server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{KvError, KvStore, Versioned};

/// In-memory implementation of [`KvStore`]
#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, Versioned>>,
    /// Number of upcoming calls that fail with `Unavailable`
    failures: AtomicU32,
}

impl MemoryKvStore {
    /// Create a new empty store
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `count` operations fail with a transport error
    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Current revision of a key, if present
    pub async fn revision(&self, key: &str) -> Option<u64> {
        self.entries.lock().await.get(key).map(|v| v.revision)
    }

    fn injected_failure(&self) -> Result<(), KvError> {
        let consumed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match consumed {
            Ok(_) => Err(KvError::Unavailable("injected failure".into())),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Versioned>, KvError> {
        self.injected_failure()?;
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn put(
        &self,
        key: &str,
        value: String,
        expected_revision: Option<u64>,
    ) -> Result<u64, KvError> {
        self.injected_failure()?;
        let mut entries = self.entries.lock().await;
        let actual = entries.get(key).map(|v| v.revision);

        let revision = match (expected_revision, actual) {
            (None, None) => 0,
            (Some(expected), Some(current)) if expected == current => current + 1,
            _ => {
                return Err(KvError::RevisionMismatch {
                    key: key.to_string(),
                    expected: expected_revision,
                    actual,
                })
            }
        };

        entries.insert(key.to_string(), Versioned { value, revision });
        Ok(revision)
    }

    async fn delete(&self, key: &str) -> Result<bool, KvError> {
        self.injected_failure()?;
        Ok(self.entries.lock().await.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_then_cas() {
        let store = MemoryKvStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);

        assert_eq!(store.put("k", "a".into(), None).await.unwrap(), 0);
        assert_eq!(store.put("k", "b".into(), Some(0)).await.unwrap(), 1);

        let current = store.get("k").await.unwrap().unwrap();
        assert_eq!(current.value, "b");
        assert_eq!(current.revision, 1);
    }

    #[tokio::test]
    async fn test_stale_revision_rejected() {
        let store = MemoryKvStore::new();
        store.put("k", "a".into(), None).await.unwrap();
        store.put("k", "b".into(), Some(0)).await.unwrap();

        let err = store.put("k", "c".into(), Some(0)).await.unwrap_err();
        assert_eq!(
            err,
            KvError::RevisionMismatch {
                key: "k".into(),
                expected: Some(0),
                actual: Some(1),
            }
        );

        // Creating an existing key is a mismatch too
        assert!(matches!(
            store.put("k", "d".into(), None).await,
            Err(KvError::RevisionMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MemoryKvStore::new();
        store.fail_next(2);
        assert!(matches!(store.get("k").await, Err(KvError::Unavailable(_))));
        assert!(matches!(store.get("k").await, Err(KvError::Unavailable(_))));
        assert!(store.get("k").await.is_ok());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryKvStore::new();
        store.put("k", "a".into(), None).await.unwrap();
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
        assert_eq!(store.revision("k").await, None);
    }
}
