//! Key-scoped locks with a time-to-live.
//!
//! A lock whose holder vanished without releasing it expires after the TTL and
//! can then be taken over, so a crashed task never wedges a match.

use std::{sync::Arc, time::Duration};

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::time::Instant;
use uuid::Uuid;

/// Scope of a lock: a whole match, or one phase of a match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    /// Match the lock belongs to.
    pub match_id: Uuid,
    /// Phase the lock is narrowed to.
    pub phase: Option<String>,
}

impl LockKey {
    /// Lock over a whole match.
    pub fn for_match(match_id: Uuid) -> Self {
        Self {
            match_id,
            phase: None,
        }
    }

    /// Lock over one phase of a match.
    pub fn for_phase(match_id: Uuid, phase: impl Into<String>) -> Self {
        Self {
            match_id,
            phase: Some(phase.into()),
        }
    }
}

#[derive(Debug)]
struct Holder {
    token: Uuid,
    expires_at: Instant,
}

/// Registry of TTL locks shared by every match.
#[derive(Debug, Clone)]
pub struct LockRegistry {
    holders: Arc<DashMap<LockKey, Holder>>,
    ttl: Duration,
}

impl LockRegistry {
    /// Empty registry whose locks live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            holders: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Take the lock unless a live holder owns it.
    pub fn try_acquire(&self, key: LockKey) -> Option<LockGuard> {
        let now = Instant::now();
        let token = Uuid::new_v4();
        let holder = Holder {
            token,
            expires_at: now + self.ttl,
        };

        match self.holders.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().expires_at > now {
                    return None;
                }
                occupied.insert(holder);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(holder);
            }
        }

        Some(LockGuard {
            holders: Arc::clone(&self.holders),
            key,
            token,
        })
    }
}

/// Ownership of one lock; released on drop unless it was taken over meanwhile.
#[derive(Debug)]
pub struct LockGuard {
    holders: Arc<DashMap<LockKey, Holder>>,
    key: LockKey,
    token: Uuid,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let token = self.token;
        self.holders
            .remove_if(&self.key, |_, holder| holder.token == token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> LockKey {
        LockKey::for_phase(Uuid::nil(), "draw")
    }

    #[tokio::test]
    async fn second_acquire_fails_while_held() {
        let locks = LockRegistry::new(Duration::from_secs(5));
        let guard = locks.try_acquire(key()).unwrap();
        assert!(locks.try_acquire(key()).is_none());
        assert!(locks.try_acquire(LockKey::for_match(Uuid::nil())).is_some());
        drop(guard);
        assert!(locks.try_acquire(key()).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lock_can_be_taken_over() {
        let locks = LockRegistry::new(Duration::from_millis(100));
        let stale = locks.try_acquire(key()).unwrap();
        tokio::time::advance(Duration::from_millis(150)).await;

        let _fresh = locks.try_acquire(key()).unwrap();
        drop(stale);
        assert!(locks.try_acquire(key()).is_none());
    }
}
