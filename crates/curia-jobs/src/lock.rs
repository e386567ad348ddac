//! Exclusive curation locks per (document, target owner).
//!
//! Acquisition returns a guard; dropping the guard releases the lock on every
//! exit path, including errors and panics inside the curation run.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

type LockKey = (String, String);

/// Registry of per-(document, target owner) write locks.
#[derive(Debug, Default)]
pub struct DocumentLocks {
    locks: Mutex<HashMap<LockKey, Arc<Mutex<()>>>>,
}

/// Held while a document is being curated for one target owner.
#[derive(Debug)]
pub struct CurationLockGuard {
    document: String,
    target_owner: String,
    _guard: OwnedMutexGuard<()>,
}

impl CurationLockGuard {
    pub fn document(&self) -> &str {
        &self.document
    }

    pub fn target_owner(&self) -> &str {
        &self.target_owner
    }
}

impl Drop for CurationLockGuard {
    fn drop(&mut self) {
        trace!(document_id = %self.document, data_owner = %self.target_owner, "Curation lock released");
    }
}

impl DocumentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    async fn entry(&self, document: &str, target_owner: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        // Entries only referenced by the registry are idle.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry((document.to_string(), target_owner.to_string()))
            .or_default()
            .clone()
    }

    /// Wait until the lock for (`document`, `target_owner`) is free and take it.
    pub async fn acquire(&self, document: &str, target_owner: &str) -> CurationLockGuard {
        let guard = self.entry(document, target_owner).await.lock_owned().await;
        trace!(document_id = %document, data_owner = %target_owner, "Curation lock acquired");
        CurationLockGuard {
            document: document.to_string(),
            target_owner: target_owner.to_string(),
            _guard: guard,
        }
    }

    /// Take the lock only if nobody holds it.
    pub async fn try_acquire(&self, document: &str, target_owner: &str) -> Option<CurationLockGuard> {
        let guard = self
            .entry(document, target_owner)
            .await
            .try_lock_owned()
            .ok()?;
        Some(CurationLockGuard {
            document: document.to_string(),
            target_owner: target_owner.to_string(),
            _guard: guard,
        })
    }

    /// Whether a curation run currently holds the lock.
    pub async fn is_locked(&self, document: &str, target_owner: &str) -> bool {
        let locks = self.locks.lock().await;
        locks
            .get(&(document.to_string(), target_owner.to_string()))
            .is_some_and(|lock| lock.try_lock().is_err())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_lock_is_exclusive_per_document_and_owner() {
        let locks = DocumentLocks::new();
        let guard = locks.acquire("doc", "CURATION_USER").await;
        assert!(locks.is_locked("doc", "CURATION_USER").await);
        assert!(locks.try_acquire("doc", "CURATION_USER").await.is_none());

        // Other documents and other target owners are independent.
        assert!(locks.try_acquire("other", "CURATION_USER").await.is_some());
        assert!(locks.try_acquire("doc", "alice").await.is_some());

        drop(guard);
        assert!(!locks.is_locked("doc", "CURATION_USER").await);
        assert!(locks.try_acquire("doc", "CURATION_USER").await.is_some());
    }

    #[tokio::test]
    async fn test_waiter_proceeds_after_release() {
        let locks = Arc::new(DocumentLocks::new());
        let guard = locks.acquire("doc", "CURATION_USER").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("doc", "CURATION_USER").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_lock_released_when_task_panics() {
        let locks = Arc::new(DocumentLocks::new());
        let task = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("doc", "CURATION_USER").await;
                panic!("merge blew up");
            })
        };
        assert!(task.await.is_err());
        assert!(locks.try_acquire("doc", "CURATION_USER").await.is_some());
    }
}
