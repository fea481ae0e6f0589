//! Per-email serialization point for profile read-merge-write sequences.
//!
//! Each normalized email maps to an async mutex. Entries are removed once no
//! task holds or waits on them, so the table only holds in-flight emails.
//! The table is per process; instances sharing a Redis ledger do not share it.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct EmailLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Held for the duration of one merge. Dropping it releases the email.
pub struct EmailGuard<'a> {
    table: &'a EmailLocks,
    email: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl EmailLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other task holds `email`, then hold it.
    pub async fn lock(&self, email: &str) -> EmailGuard<'_> {
        let mutex = self
            .locks
            .entry(email.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = mutex.lock_owned().await;
        EmailGuard {
            table: self,
            email: email.to_string(),
            guard: Some(guard),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for EmailGuard<'_> {
    fn drop(&mut self) {
        // Release the mutex first so the strong count reflects only the
        // table and any waiters.
        drop(self.guard.take());
        self.table
            .locks
            .remove_if(&self.email, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
