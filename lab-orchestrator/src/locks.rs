//! Per-key async mutual exclusion.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slots<K> = Mutex<HashMap<K, Arc<AsyncMutex<()>>>>;

/// A lock per key, created on first use and dropped once nobody holds or waits on it.
pub struct KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    slots: Arc<Slots<K>>,
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: K) -> KeyGuard<K> {
        let slot = self
            .slots
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();

        // Built before waiting so a cancelled wait still releases the slot
        let mut held = KeyGuard {
            slots: Arc::clone(&self.slots),
            key,
            slot,
            guard: None,
        };
        held.guard = Some(Arc::clone(&held.slot).lock_owned().await);
        held
    }

    /// Number of keys with a live slot.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K> Default for KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> fmt::Debug for KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedLocks")
            .field("keys", &self.len())
            .finish()
    }
}

/// Held access to one key. Releasing it wakes the next waiter.
pub struct KeyGuard<K>
where
    K: Eq + Hash + Clone,
{
    slots: Arc<Slots<K>>,
    key: K,
    slot: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K> Drop for KeyGuard<K>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        let mut slots = self.slots.lock();
        drop(self.guard.take());
        // Only the map and this guard left: nobody holds or waits on the key
        let idle = Arc::strong_count(&self.slot) == 2
            && slots
                .get(&self.key)
                .is_some_and(|slot| Arc::ptr_eq(slot, &self.slot));
        if idle {
            slots.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn slots_are_dropped_after_release() {
        let locks = KeyedLocks::new();
        {
            let _guard = locks.lock("a".to_string()).await;
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.lock("a".to_string()).await;
        let b = tokio::time::timeout(Duration::from_secs(1), locks.lock("b".to_string())).await;
        assert!(b.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn same_key_is_exclusive() {
        let locks = Arc::new(KeyedLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();

        for _ in 0..16 {
            let locks = Arc::clone(&locks);
            let inside = Arc::clone(&inside);
            tasks.push(tokio::spawn(async move {
                let _guard = locks.lock("key".to_string()).await;
                assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn cancelled_waiter_releases_its_slot() {
        let locks = KeyedLocks::new();
        let holder = locks.lock("a".to_string()).await;

        let mut waiting = Box::pin(locks.lock("a".to_string()));
        let polled = tokio::time::timeout(Duration::from_millis(5), &mut waiting).await;
        assert!(polled.is_err());

        // The slot is handed to the queued waiter, which then gives up
        drop(holder);
        assert_eq!(locks.len(), 1);
        drop(waiting);
        assert!(locks.is_empty());
    }
}
