//! Per-account exclusive locks

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::types::{ReconciliationError, ReconciliationResult};

type LockTable = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// Hands out one async lock per account id
///
/// Runs on different accounts proceed in parallel; runs on the same account
/// are serialized for as long as the guard is held. An account's entry is
/// removed once its last guard is released and nobody is waiting on it.
#[derive(Debug, Default, Clone)]
pub struct AccountLocks {
    locks: LockTable,
}

/// Exclusive access to one account, released on drop
#[derive(Debug)]
pub struct AccountGuard {
    account_id: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: LockTable,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to an account
    pub async fn acquire(&self, account_id: &str) -> ReconciliationResult<AccountGuard> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|_| ReconciliationError::Storage("account lock table poisoned".into()))?;
            locks
                .entry(account_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        Ok(AccountGuard {
            account_id: account_id.to_string(),
            guard: Some(lock.lock_owned().await),
            locks: Arc::clone(&self.locks),
        })
    }

    /// Number of accounts with a held or awaited lock
    pub fn tracked_accounts(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or_default()
    }
}

impl Drop for AccountGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        // the table's own reference is the only one left when nobody waits
        if let Ok(mut locks) = self.locks.lock() {
            if locks
                .get(&self.account_id)
                .is_some_and(|lock| Arc::strong_count(lock) == 1)
            {
                locks.remove(&self.account_id);
            }
        }
    }
}
