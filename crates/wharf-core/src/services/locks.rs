use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per project id. Holding the guard makes the holder the
/// only writer of that project's state; different ids never contend.
#[derive(Default)]
pub struct ProjectLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

pub type ProjectGuard = OwnedMutexGuard<()>;

impl ProjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Wait for exclusive ownership of `id`.
    pub async fn lock(&self, id: &str) -> ProjectGuard {
        self.entry(id).lock_owned().await
    }

    /// Ownership of `id` if nobody else holds it right now.
    pub fn try_lock(&self, id: &str) -> Option<ProjectGuard> {
        self.entry(id).try_lock_owned().ok()
    }

    /// Drop the entry for a deleted project unless someone is still waiting.
    pub fn forget(&self, id: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(lock) = locks.get(id) {
            if Arc::strong_count(lock) == 1 {
                locks.remove(id);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_id_is_exclusive() {
        let locks = ProjectLocks::new();
        let guard = locks.lock("a").await;
        assert!(locks.try_lock("a").is_none());
        drop(guard);
        assert!(locks.try_lock("a").is_some());
    }

    #[tokio::test]
    async fn different_ids_are_independent() {
        let locks = ProjectLocks::new();
        let _a = locks.lock("a").await;
        assert!(locks.try_lock("b").is_some());
    }

    #[tokio::test]
    async fn forget_removes_idle_entries_only() {
        let locks = ProjectLocks::new();
        let guard = locks.lock("a").await;
        locks.forget("a");
        assert_eq!(locks.len(), 1);
        drop(guard);
        locks.forget("a");
        assert!(locks.is_empty());
    }
}
