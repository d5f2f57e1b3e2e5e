use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Duration;

use blobgate_core::Identity;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::error::BrokerError;
use crate::session::UploadSession;

/// A registered session. The inner lock serializes chunk application for
/// one upload.
pub type SharedSession = Arc<tokio::sync::Mutex<UploadSession>>;

enum Slot {
    /// A header is being processed; the blob is not open yet.
    Pending,
    Active {
        session: SharedSession,
        last_activity: Instant,
    },
}

/// What the registry holds for an identity.
#[derive(Debug, Clone)]
pub enum Lookup {
    Missing,
    Pending,
    Active(SharedSession),
}

/// Maps connection identities to their upload sessions.
///
/// Every mutation happens under one registry-wide lock that is never held
/// across an await point. Registration is two-phase: [`reserve`] claims the
/// identity before any storage work so that a second header for the same
/// identity is refused without creating a second blob; [`activate`] then
/// installs the opened session.
///
/// [`reserve`]: SessionRegistry::reserve
/// [`activate`]: SessionRegistry::activate
#[derive(Default)]
pub struct SessionRegistry {
    slots: Mutex<HashMap<Identity, Slot>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `identity`. Fails if it already has a pending or active
    /// session.
    pub fn reserve(&self, identity: &Identity) -> Result<(), BrokerError> {
        match self.slots.lock().entry(identity.clone()) {
            Entry::Occupied(_) => Err(BrokerError::DuplicateSession(identity.clone())),
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::Pending);
                Ok(())
            }
        }
    }

    /// Install the session for a reserved identity.
    pub fn activate(&self, identity: &Identity, session: UploadSession) -> SharedSession {
        let shared = Arc::new(tokio::sync::Mutex::new(session));
        self.slots.lock().insert(
            identity.clone(),
            Slot::Active {
                session: Arc::clone(&shared),
                last_activity: Instant::now(),
            },
        );
        debug!(identity = %identity, "session registered");
        shared
    }

    /// Drop a reservation that never became active.
    pub fn cancel(&self, identity: &Identity) {
        let mut slots = self.slots.lock();
        if matches!(slots.get(identity), Some(Slot::Pending)) {
            slots.remove(identity);
        }
    }

    /// Look up `identity`, marking an active session as just used.
    pub fn lookup(&self, identity: &Identity) -> Lookup {
        match self.slots.lock().get_mut(identity) {
            None => Lookup::Missing,
            Some(Slot::Pending) => Lookup::Pending,
            Some(Slot::Active {
                session,
                last_activity,
            }) => {
                *last_activity = Instant::now();
                Lookup::Active(Arc::clone(session))
            }
        }
    }

    /// Unregister `identity` if it still maps to `session`.
    pub fn remove(&self, identity: &Identity, session: &SharedSession) -> bool {
        let mut slots = self.slots.lock();
        let current = matches!(
            slots.get(identity),
            Some(Slot::Active { session: s, .. }) if Arc::ptr_eq(s, session)
        );
        if current {
            slots.remove(identity);
            debug!(identity = %identity, "session unregistered");
        }
        current
    }

    /// Unregister and return the active session of `identity`, if any.
    pub fn take(&self, identity: &Identity) -> Option<SharedSession> {
        let mut slots = self.slots.lock();
        if !matches!(slots.get(identity), Some(Slot::Active { .. })) {
            return None;
        }
        match slots.remove(identity) {
            Some(Slot::Active { session, .. }) => Some(session),
            _ => None,
        }
    }

    /// Unregister and return every active session unused for at least
    /// `idle_for`.
    pub fn take_idle(&self, idle_for: Duration) -> Vec<(Identity, SharedSession)> {
        let Some(cutoff) = Instant::now().checked_sub(idle_for) else {
            return Vec::new();
        };
        let mut slots = self.slots.lock();
        let idle: Vec<Identity> = slots
            .iter()
            .filter_map(|(identity, slot)| match slot {
                Slot::Active { last_activity, .. } if *last_activity <= cutoff => {
                    Some(identity.clone())
                }
                _ => None,
            })
            .collect();
        idle.into_iter()
            .filter_map(|identity| match slots.remove(&identity) {
                Some(Slot::Active { session, .. }) => Some((identity, session)),
                _ => None,
            })
            .collect()
    }

    /// Unregister and return every active session.
    pub fn drain(&self) -> Vec<(Identity, SharedSession)> {
        self.slots
            .lock()
            .drain()
            .filter_map(|(identity, slot)| match slot {
                Slot::Active { session, .. } => Some((identity, session)),
                Slot::Pending => None,
            })
            .collect()
    }

    /// Number of pending and active sessions.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use blobgate_store::{ObjectStore, StoreConfig};
    use blobgate_store_memory::MemoryBackend;

    use super::*;

    async fn new_session() -> UploadSession {
        let store = ObjectStore::new(Arc::new(MemoryBackend::new()), StoreConfig::default());
        let handle = store.create_new("f").await.unwrap();
        let lock = handle.acquire_lock(None).await.unwrap();
        UploadSession::new(handle, lock, 10)
    }

    #[test]
    fn second_reservation_is_refused() {
        let registry = SessionRegistry::new();
        let id = Identity::from("peer-1");
        registry.reserve(&id).unwrap();
        let err = registry.reserve(&id).unwrap_err();
        assert!(matches!(err, BrokerError::DuplicateSession(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn cancel_only_drops_pending_slots() {
        let registry = SessionRegistry::new();
        let id = Identity::from("peer-1");
        registry.reserve(&id).unwrap();
        assert!(matches!(registry.lookup(&id), Lookup::Pending));
        registry.cancel(&id);
        assert!(matches!(registry.lookup(&id), Lookup::Missing));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn active_session_blocks_new_registration() {
        let registry = SessionRegistry::new();
        let id = Identity::from("peer-1");
        registry.reserve(&id).unwrap();
        let shared = registry.activate(&id, new_session().await);

        assert!(registry.reserve(&id).is_err());
        registry.cancel(&id);
        assert!(matches!(registry.lookup(&id), Lookup::Active(_)), "cancel keeps active slots");

        assert!(registry.remove(&id, &shared));
        assert!(!registry.remove(&id, &shared));
        registry.reserve(&id).unwrap();
        shared.lock().await.abort().await;
    }

    #[tokio::test]
    async fn remove_ignores_a_replaced_session() {
        let registry = SessionRegistry::new();
        let id = Identity::from("peer-1");
        registry.reserve(&id).unwrap();
        let old = registry.activate(&id, new_session().await);
        let taken = registry.take(&id).unwrap();
        assert!(Arc::ptr_eq(&old, &taken));

        registry.reserve(&id).unwrap();
        let new = registry.activate(&id, new_session().await);
        assert!(!registry.remove(&id, &old), "stale handle must not evict the new session");
        assert!(matches!(registry.lookup(&id), Lookup::Active(s) if Arc::ptr_eq(&s, &new)));

        old.lock().await.abort().await;
        new.lock().await.abort().await;
    }

    #[tokio::test(start_paused = true)]
    async fn idle_sessions_are_taken_and_busy_ones_kept() {
        let registry = SessionRegistry::new();
        let idle = Identity::from("idle");
        let busy = Identity::from("busy");
        for id in [&idle, &busy] {
            registry.reserve(id).unwrap();
            registry.activate(id, new_session().await);
        }

        tokio::time::advance(Duration::from_secs(200)).await;
        let _ = registry.lookup(&busy);
        tokio::time::advance(Duration::from_secs(200)).await;

        let taken = registry.take_idle(Duration::from_secs(300));
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].0, idle);
        assert!(matches!(registry.lookup(&busy), Lookup::Active(_)));
        assert!(matches!(registry.lookup(&idle), Lookup::Missing));

        for (_, session) in taken.into_iter().chain(registry.drain()) {
            session.lock().await.abort().await;
        }
        assert!(registry.is_empty());
    }
}
