//! Per-thread mutual exclusion
//!
//! Turns for the same thread are serialized; turns for different threads
//! run concurrently. Entries are held weakly so an idle thread costs nothing
//! once its last guard is dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

pub type ThreadGuard = OwnedMutexGuard<()>;

#[derive(Default)]
pub struct ThreadLocks {
    locks: Mutex<HashMap<String, Weak<AsyncMutex<()>>>>,
}

impl ThreadLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, thread_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        locks.retain(|_, weak| weak.strong_count() > 0);

        if let Some(lock) = locks.get(thread_id).and_then(Weak::upgrade) {
            return lock;
        }
        let lock = Arc::new(AsyncMutex::new(()));
        locks.insert(thread_id.to_string(), Arc::downgrade(&lock));
        lock
    }

    /// Wait until no other turn holds `thread_id`
    pub async fn acquire(&self, thread_id: &str) -> ThreadGuard {
        let lock = self.lock_for(thread_id);
        lock.lock_owned().await
    }

    /// Acquire without waiting, `None` if the thread is busy
    pub fn try_acquire(&self, thread_id: &str) -> Option<ThreadGuard> {
        self.lock_for(thread_id).try_lock_owned().ok()
    }

    /// Number of threads with a live guard or waiter
    pub fn active(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}
