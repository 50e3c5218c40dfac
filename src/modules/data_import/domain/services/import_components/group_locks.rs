use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// In-process locks serializing runs of jobs that share a group key.
///
/// Jobs submitted without a group key get a random one, so they never wait.
#[derive(Default)]
pub struct GroupLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl GroupLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other run of `group` is active
    pub async fn lock(&self, group: &str) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(group.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    /// Forget the lock of `group` once nobody holds or waits for it
    pub fn release(&self, group: &str) {
        self.locks
            .remove_if(group, |_, mutex| Arc::strong_count(mutex) == 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
