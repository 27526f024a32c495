use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::container::ContainerID;

/// Per-container async mutexes.
///
/// Operations holding the guard for the same [`ContainerID`] run one after another; a second
/// caller waits for the first to finish. Different ids never contend.
#[derive(Debug, Default)]
pub struct KeyedLock {
    locks: DashMap<ContainerID, Arc<Mutex<()>>>,
}

impl KeyedLock {
    pub async fn lock(&self, id: &ContainerID) -> OwnedMutexGuard<()> {
        // The shard guard must be released before awaiting the mutex.
        let mutex = Arc::clone(self.locks.entry(id.clone()).or_default().value());
        mutex.lock_owned().await
    }

    /// Drops the mutex for `id` unless someone holds or waits for it.
    pub fn forget(&self, id: &ContainerID) {
        self.locks
            .remove_if(id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_same_id_is_serialized() {
        let locks = Arc::new(KeyedLock::default());
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));
        let id = ContainerID::new("c1").unwrap();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let locks = Arc::clone(&locks);
            let active = Arc::clone(&active);
            let max_active = Arc::clone(&max_active);
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock(&id).await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_active.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_ids_do_not_contend() {
        let locks = KeyedLock::default();
        let _a = locks.lock(&ContainerID::new("a").unwrap()).await;
        let b = tokio::time::timeout(
            Duration::from_millis(100),
            locks.lock(&ContainerID::new("b").unwrap()),
        )
        .await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_forget_keeps_held_locks() {
        let locks = KeyedLock::default();
        let id = ContainerID::new("a").unwrap();
        let guard = locks.lock(&id).await;
        locks.forget(&id);
        assert!(locks.locks.contains_key(&id));
        drop(guard);
        locks.forget(&id);
        assert!(!locks.locks.contains_key(&id));
    }
}
