//! # Session Registry
//!
//! Tracks the live relay sessions so the server can enforce the concurrency
//! limit, report the session count, and close every session on shutdown.

use actix::prelude::*;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use uuid::Uuid;

/// Ask a session to tear itself down and close its client connection.
#[derive(Message, Debug, Clone)]
#[rtype(result = "()")]
pub struct CloseSession {
    pub reason: String,
}

/// Shared map of session id → close handle.
///
/// ## Slot Lifecycle:
/// 1. **Reserve**: The upgrade handler claims a slot before starting the actor
/// 2. **Register**: The actor's `started` hook attaches its close handle
/// 3. **Unregister**: `stopped` (or a failed upgrade) frees the slot
///
/// A reserved slot without a handle still counts against the limit.
///
/// ## Thread Safety:
/// Cloning shares the same map. Reservation checks and inserts under one write
/// lock, so concurrent upgrades on different workers cannot overshoot the limit.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<Uuid, Option<Recipient<CloseSession>>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a slot for `id` if fewer than `max` sessions exist.
    pub fn try_reserve(&self, id: Uuid, max: usize) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        if sessions.contains_key(&id) {
            return true;
        }
        if sessions.len() >= max {
            return false;
        }
        sessions.insert(id, None);
        true
    }

    /// Attach the close handle for `id`, taking a slot if none was reserved.
    pub fn register(&self, id: Uuid, handle: Recipient<CloseSession>) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Some(handle));
    }

    /// Remove a session. Returns false if it was not registered.
    pub fn unregister(&self, id: &Uuid) -> bool {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some()
    }

    pub fn count(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    /// Tell every registered session to close. Returns how many were notified.
    ///
    /// Sessions unregister themselves once they have stopped. Reserved slots
    /// whose actor has not started yet have no handle and are skipped.
    pub fn close_all(&self, reason: &str) -> usize {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        let mut notified = 0;
        for (id, handle) in sessions.iter() {
            if let Some(handle) = handle {
                tracing::info!("Closing session {}: {}", id, reason);
                handle.do_send(CloseSession {
                    reason: reason.to_string(),
                });
                notified += 1;
            }
        }
        notified
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Counts close requests.
    #[derive(Default)]
    struct CloseCounter {
        closed: usize,
    }

    impl Actor for CloseCounter {
        type Context = Context<Self>;
    }

    impl Handler<CloseSession> for CloseCounter {
        type Result = ();

        fn handle(&mut self, _msg: CloseSession, _ctx: &mut Self::Context) {
            self.closed += 1;
        }
    }

    #[derive(Message)]
    #[rtype(result = "usize")]
    struct Closed;

    impl Handler<Closed> for CloseCounter {
        type Result = usize;

        fn handle(&mut self, _msg: Closed, _ctx: &mut Self::Context) -> usize {
            self.closed
        }
    }

    #[actix_web::test]
    async fn test_register_and_close_all() {
        let registry = SessionRegistry::new();
        let first = CloseCounter::default().start();
        let second = CloseCounter::default().start();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        registry.register(a, first.clone().recipient());
        registry.register(b, second.clone().recipient());
        assert_eq!(registry.count(), 2);

        assert_eq!(registry.close_all("shutdown"), 2);
        assert_eq!(first.send(Closed).await.unwrap(), 1);
        assert_eq!(second.send(Closed).await.unwrap(), 1);

        assert!(registry.unregister(&a));
        assert!(!registry.unregister(&a));
        assert_eq!(registry.ids(), vec![b]);
    }

    #[test]
    fn test_reservations_enforce_limit() {
        let registry = SessionRegistry::new();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        assert!(registry.try_reserve(a, 2));
        assert!(registry.try_reserve(b, 2));
        assert!(!registry.try_reserve(c, 2));
        assert_eq!(registry.count(), 2);

        // Reserving again for a held slot is not a second slot
        assert!(registry.try_reserve(a, 2));
        assert_eq!(registry.count(), 2);

        // Reserved slots have no handle yet
        assert_eq!(registry.close_all("shutdown"), 0);

        assert!(registry.unregister(&b));
        assert!(registry.try_reserve(c, 2));
    }

    #[actix_web::test]
    async fn test_register_fills_reserved_slot() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();
        let counter = CloseCounter::default().start();

        assert!(registry.try_reserve(id, 1));
        registry.register(id, counter.clone().recipient());
        assert_eq!(registry.count(), 1);
        assert!(!registry.try_reserve(Uuid::new_v4(), 1));

        assert_eq!(registry.close_all("shutdown"), 1);
        assert_eq!(counter.send(Closed).await.unwrap(), 1);
    }
}
