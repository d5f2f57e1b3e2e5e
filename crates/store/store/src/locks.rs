use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::Instant;

use crate::backend::{LockOutcome, LockSpec, Locker};
use crate::error::BackendError;

#[derive(Debug, Clone)]
struct LockEntry {
    cookie: String,
    expires_at: Option<Instant>,
}

impl LockEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Process-local exclusive locks with optional leases, for backends that
/// have no native locking.
///
/// Expiry is lazy: a lapsed entry is evicted by the next operation on the
/// same lock.
#[derive(Debug, Default)]
pub struct LockTable {
    locks: DashMap<(String, String), LockEntry>,
}

impl LockTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_exclusive(&self, object: &str, spec: &LockSpec) -> LockOutcome {
        let key = (object.to_owned(), spec.name.clone());
        self.locks.remove_if(&key, |_, entry| entry.is_expired());

        let expires_at = spec
            .lease
            .and_then(|lease| Instant::now().checked_add(lease));
        match self.locks.entry(key) {
            Entry::Occupied(mut held) => {
                if spec.renew && held.get().cookie == spec.cookie {
                    held.get_mut().expires_at = expires_at;
                    LockOutcome::Acquired
                } else {
                    LockOutcome::Busy
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(LockEntry {
                    cookie: spec.cookie.clone(),
                    expires_at,
                });
                LockOutcome::Acquired
            }
        }
    }

    pub fn unlock(&self, object: &str, name: &str, cookie: &str) -> Result<(), BackendError> {
        let key = (object.to_owned(), name.to_owned());
        self.locks
            .remove_if(&key, |_, entry| entry.cookie == cookie && !entry.is_expired())
            .map(|_| ())
            .ok_or_else(|| BackendError::NotFound(format!("lock {name} on {object} not held by {cookie}")))
    }

    #[must_use]
    pub fn lockers(&self, object: &str, name: &str) -> Vec<Locker> {
        let key = (object.to_owned(), name.to_owned());
        self.locks.remove_if(&key, |_, entry| entry.is_expired());
        self.locks
            .get(&key)
            .map(|entry| {
                vec![Locker {
                    cookie: entry.cookie.clone(),
                }]
            })
            .unwrap_or_default()
    }

    /// Drop every lock on `object`.
    pub fn remove_object(&self, object: &str) {
        self.locks.retain(|(locked, _), _| locked != object);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn spec(cookie: &str, lease: Option<Duration>, renew: bool) -> LockSpec {
        LockSpec {
            name: "lock".to_owned(),
            cookie: cookie.to_owned(),
            lease,
            renew,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn lease_expires_lazily() {
        let table = LockTable::new();
        let lease = Some(Duration::from_secs(2));
        assert_eq!(table.lock_exclusive("o", &spec("a", lease, false)), LockOutcome::Acquired);
        assert_eq!(table.lock_exclusive("o", &spec("b", lease, false)), LockOutcome::Busy);

        tokio::time::advance(Duration::from_secs(3)).await;

        assert!(table.lockers("o", "lock").is_empty());
        assert_eq!(table.lock_exclusive("o", &spec("b", lease, false)), LockOutcome::Acquired);
    }

    #[tokio::test(start_paused = true)]
    async fn renew_extends_lease() {
        let table = LockTable::new();
        let lease = Some(Duration::from_secs(2));
        table.lock_exclusive("o", &spec("a", lease, false));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(table.lock_exclusive("o", &spec("a", lease, true)), LockOutcome::Acquired);
        tokio::time::advance(Duration::from_secs(1)).await;

        assert_eq!(table.lockers("o", "lock").len(), 1, "renewed lease still running");
        assert!(table.unlock("o", "lock", "a").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lock_cannot_be_unlocked() {
        let table = LockTable::new();
        table.lock_exclusive("o", &spec("a", Some(Duration::from_secs(1)), false));
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(table.unlock("o", "lock", "a").is_err());
    }

    #[test]
    fn remove_object_drops_only_its_locks() {
        let table = LockTable::new();
        table.lock_exclusive("o1", &spec("a", None, false));
        table.lock_exclusive("o2", &spec("b", None, false));
        table.remove_object("o1");
        assert!(table.lockers("o1", "lock").is_empty());
        assert_eq!(table.lockers("o2", "lock").len(), 1);
    }
}
