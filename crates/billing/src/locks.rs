//! Per-account mutual exclusion
//!
//! Every balance read-modify-write for an account runs while holding that
//! account's lock. Locks are created lazily; the map itself sits behind a
//! plain mutex so concurrent first use cannot create two locks for one key.
//! The guarantee is process-local only.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use blogify_shared::AccountId;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Guard held for the duration of a ledger mutation
pub type AccountLockGuard = OwnedMutexGuard<()>;

/// Registry of per-account locks
#[derive(Debug, Default)]
pub struct UserLocks {
    locks: Mutex<HashMap<AccountId, Arc<AsyncMutex<()>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for and take the lock of one account
    pub async fn acquire(&self, account_id: &AccountId) -> AccountLockGuard {
        self.handle(account_id).lock_owned().await
    }

    fn handle(&self, account_id: &AccountId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(account_id.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Number of accounts with a lock allocated
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop locks nobody is holding or waiting on
    pub fn prune(&self) -> usize {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - locks.len()
    }
}
