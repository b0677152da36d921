//! SessionRegistry - concurrent map request id → in-flight session
//!
//! Lock order selalu registry → session, tidak pernah sebaliknya.
//! Session melepas lock-nya sendiri sebelum memanggil `remove`.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::trace;

use super::RequestId;
use crate::error::RegistryError;
use crate::reactor::lock;

/// Sesuatu yang bisa di-cancel lewat registry
pub trait Cancellable: Send + Sync {
    /// Set cancel flag under the session's own lock and abort whatever
    /// transport operation is currently in flight.
    fn request_cancel(&self);
}

pub struct SessionRegistry<S> {
    sessions: Mutex<HashMap<RequestId, Arc<S>>>,
}

impl<S> Default for SessionRegistry<S> {
    fn default() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }
}

impl<S: Cancellable> SessionRegistry<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert session. Duplicate id ditolak tanpa mengubah entry yang ada.
    pub fn register(&self, id: RequestId, session: Arc<S>) -> Result<(), RegistryError> {
        match lock(&self.sessions).entry(id) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateRequestId(id)),
            Entry::Vacant(slot) => {
                slot.insert(session);
                Ok(())
            }
        }
    }

    /// Cancel session `id` jika masih in flight.
    ///
    /// Id yang tidak dikenal atau sudah selesai bukan error: returns `false`.
    pub fn cancel(&self, id: RequestId) -> bool {
        let sessions = lock(&self.sessions);
        match sessions.get(&id) {
            Some(session) => {
                session.request_cancel();
                true
            }
            None => {
                trace!("Cancel for unknown request #{} ignored", id);
                false
            }
        }
    }

    /// Idempotent removal.
    pub fn remove(&self, id: RequestId) -> Option<Arc<S>> {
        lock(&self.sessions).remove(&id)
    }

    /// Keluarkan semua session sekaligus. Dipakai saat client di-drop
    /// tanpa shutdown.
    pub fn drain(&self) -> Vec<Arc<S>> {
        lock(&self.sessions).drain().map(|(_, session)| session).collect()
    }

    pub fn contains(&self, id: RequestId) -> bool {
        lock(&self.sessions).contains_key(&id)
    }

    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.sessions).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[derive(Default)]
    struct CountingSession {
        cancels: AtomicUsize,
    }

    impl Cancellable for CountingSession {
        fn request_cancel(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_duplicate_keeps_original() {
        let registry = SessionRegistry::new();
        let original = Arc::new(CountingSession::default());
        let duplicate = Arc::new(CountingSession::default());

        registry.register(7, Arc::clone(&original)).unwrap();
        assert_eq!(
            registry.register(7, Arc::clone(&duplicate)),
            Err(RegistryError::DuplicateRequestId(7))
        );

        let stored = registry.remove(7).unwrap();
        assert!(Arc::ptr_eq(&stored, &original));
    }

    #[test]
    fn test_cancel_reaches_registered_session() {
        let registry = SessionRegistry::new();
        let session = Arc::new(CountingSession::default());
        registry.register(1, Arc::clone(&session)).unwrap();

        assert!(registry.cancel(1));
        assert!(registry.cancel(1));
        assert_eq!(session.cancels.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_drain_empties_registry() {
        let registry = SessionRegistry::new();
        for id in 0..3 {
            registry
                .register(id, Arc::new(CountingSession::default()))
                .unwrap();
        }

        assert_eq!(registry.drain().len(), 3);
        assert!(registry.is_empty());
        assert!(registry.drain().is_empty());
    }

    #[test]
    fn test_cancel_unknown_is_noop() {
        let registry: SessionRegistry<CountingSession> = SessionRegistry::new();
        assert!(!registry.cancel(99));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = SessionRegistry::new();
        registry
            .register(3, Arc::new(CountingSession::default()))
            .unwrap();

        assert!(registry.remove(3).is_some());
        assert!(registry.remove(3).is_none());
        assert!(!registry.contains(3));

        // Setelah remove, id boleh dipakai lagi
        registry
            .register(3, Arc::new(CountingSession::default()))
            .unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_concurrent_register_single_winner() {
        let registry = Arc::new(SessionRegistry::new());
        let winners = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let winners = Arc::clone(&winners);
                thread::spawn(move || {
                    if registry
                        .register(42, Arc::new(CountingSession::default()))
                        .is_ok()
                    {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }
}
