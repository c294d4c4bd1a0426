//! Per-user mutual exclusion.
//!
//! The store has no transactions, so every read-modify-write on a user's
//! records runs under the lock for that (user, concern) pair.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use calbridge_core::UserId;

/// Which set of a user's records a lock guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockScope {
    /// The stored credential (exchange, refresh write-back, disconnect).
    Credential,
    /// The watch secret and channel descriptor.
    Watch,
    /// Sync token and digest bookkeeping.
    Sync,
}

impl fmt::Display for LockScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Credential => "credential",
            Self::Watch => "watch",
            Self::Sync => "sync",
        })
    }
}

type LockMap = HashMap<String, Arc<AsyncMutex<()>>>;

/// Hands out one async mutex per `"{user}:{scope}"`.
///
/// An entry lives only while some caller holds or waits for it.
#[derive(Debug, Default)]
pub struct UserLocks {
    locks: Arc<Mutex<LockMap>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for and returns the guard for `user`'s `scope`.
    pub async fn lock(&self, user: &UserId, scope: LockScope) -> UserLockGuard {
        let key = format!("{}:{}", user, scope);
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(key.clone()).or_default().clone()
        };
        let guard = mutex.lock_owned().await;
        UserLockGuard {
            guard: Some(guard),
            key,
            locks: self.locks.clone(),
        }
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Held lock; releasing the last reference to a key removes it.
#[derive(Debug)]
pub struct UserLockGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: String,
    locks: Arc<Mutex<LockMap>>,
}

impl Drop for UserLockGuard {
    fn drop(&mut self) {
        // Release first so the guard's own reference is not counted.
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Waiters clone the mutex under this same map lock, so a count of
        // one means nobody else can reach it.
        if locks
            .get(&self.key)
            .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
        {
            locks.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn user(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    #[tokio::test]
    async fn same_scope_serializes() {
        let locks = Arc::new(UserLocks::new());
        let guard = locks.lock(&user("U1"), LockScope::Credential).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.lock(&user("U1"), LockScope::Credential).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn other_users_and_scopes_do_not_block() {
        let locks = UserLocks::new();
        let _a = locks.lock(&user("U1"), LockScope::Credential).await;
        let _b = locks.lock(&user("U1"), LockScope::Watch).await;
        let _c = locks.lock(&user("U2"), LockScope::Credential).await;
        assert_eq!(locks.len(), 3);
    }

    #[tokio::test]
    async fn released_keys_are_forgotten() {
        let locks = UserLocks::new();
        for n in 0..500 {
            let _g = locks.lock(&user(&format!("forged-{}", n)), LockScope::Watch).await;
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn key_survives_while_a_waiter_is_queued() {
        let locks = Arc::new(UserLocks::new());
        let guard = locks.lock(&user("U1"), LockScope::Sync).await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.lock(&user("U1"), LockScope::Sync).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(guard);
        assert_eq!(locks.len(), 1);

        waiter.await.unwrap();
        assert!(locks.is_empty());
    }
}
