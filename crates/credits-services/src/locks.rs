//! Per-account locks
//!
//! Lazily created async mutexes keyed by account id. Dropping the returned
//! guard releases the lock.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

#[derive(Default)]
pub struct AccountLockManager {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl AccountLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, account_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait for the account lock
    pub async fn lock(&self, account_id: &str) -> OwnedMutexGuard<()> {
        let mutex = self.entry(account_id);
        let guard = mutex.lock_owned().await;
        debug!("Acquired lock for account {}", account_id);
        guard
    }

    /// Take the account lock only if it is free
    pub fn try_lock(&self, account_id: &str) -> Option<OwnedMutexGuard<()>> {
        self.entry(account_id).try_lock_owned().ok()
    }

    /// Number of accounts that ever took a lock
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_lock_is_exclusive_per_account() {
        let locks = AccountLockManager::new();

        let guard = locks.lock("a").await;
        assert!(locks.try_lock("a").is_none());
        assert!(locks.try_lock("b").is_some());

        drop(guard);
        assert!(locks.try_lock("a").is_some());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_holders_never_overlap() {
        let locks = Arc::new(AccountLockManager::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock("shared").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
