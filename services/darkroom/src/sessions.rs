//! Guest session registry.
//!
//! One `UploadGate` per (event, session). Gates live only in memory and
//! vanish when the session ends or goes idle.

use crate::upload_gate::{GatePolicy, UploadGate};
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// A guest device's capture state for one event
#[derive(Debug)]
pub struct Session {
    id: String,
    event_id: Uuid,
    gate: UploadGate,
    /// Serialises check -> store -> record for this session
    attempt: tokio::sync::Mutex<()>,
    last_seen: Mutex<DateTime<Utc>>,
}

impl Session {
    fn new(event_id: Uuid, id: String, policy: GatePolicy, now: DateTime<Utc>) -> Self {
        Self {
            id,
            event_id,
            gate: UploadGate::new(policy),
            attempt: tokio::sync::Mutex::new(()),
            last_seen: Mutex::new(now),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn gate(&self) -> &UploadGate {
        &self.gate
    }

    /// Hold for the whole of one capture attempt
    pub async fn begin_attempt(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.attempt.lock().await
    }

    pub fn touch(&self, now: DateTime<Utc>) {
        let mut last_seen = self.last_seen.lock();
        if now > *last_seen {
            *last_seen = now;
        }
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        *self.last_seen.lock()
    }
}

type SessionKey = (Uuid, String);

/// All live sessions
#[derive(Debug)]
pub struct SessionRegistry {
    policy: GatePolicy,
    idle_after: TimeDelta,
    sessions: RwLock<HashMap<SessionKey, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new(policy: GatePolicy, idle_after: TimeDelta) -> Self {
        Self {
            policy,
            idle_after,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch the session, creating a fresh gate on first sight
    pub fn get_or_create(&self, event_id: Uuid, session_id: &str, now: DateTime<Utc>) -> Arc<Session> {
        let key = (event_id, session_id.to_string());

        if let Some(session) = self.sessions.read().get(&key) {
            session.touch(now);
            return session.clone();
        }

        let mut sessions = self.sessions.write();
        let session = sessions
            .entry(key)
            .or_insert_with(|| {
                debug!(%event_id, session_id, "Opening capture session");
                Arc::new(Session::new(event_id, session_id.to_string(), self.policy, now))
            })
            .clone();
        session.touch(now);
        session
    }

    pub fn get(&self, event_id: Uuid, session_id: &str) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .get(&(event_id, session_id.to_string()))
            .cloned()
    }

    /// Drop a session and its gate; returns whether it existed
    pub fn end(&self, event_id: Uuid, session_id: &str) -> bool {
        self.sessions
            .write()
            .remove(&(event_id, session_id.to_string()))
            .is_some()
    }

    /// Remove sessions unused for longer than the idle period
    pub fn sweep_idle(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, session| now - session.last_seen() < self.idle_after);
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-15T19:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn registry() -> SessionRegistry {
        SessionRegistry::new(GatePolicy::default(), TimeDelta::hours(1))
    }

    #[test]
    fn test_same_session_shares_gate() {
        let registry = registry();
        let event = Uuid::new_v4();

        let first = registry.get_or_create(event, "phone-a", now());
        first.gate().record_success(now());

        let again = registry.get_or_create(event, "phone-a", now());
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(again.gate().snapshot(now()).uploads_in_window, 1);
    }

    #[test]
    fn test_sessions_are_isolated() {
        let registry = registry();
        let event = Uuid::new_v4();

        let a = registry.get_or_create(event, "phone-a", now());
        let b = registry.get_or_create(event, "phone-b", now());
        let other_event = registry.get_or_create(Uuid::new_v4(), "phone-a", now());
        a.gate().record_success(now());

        assert_eq!(b.gate().snapshot(now()).uploads_in_window, 0);
        assert_eq!(other_event.gate().snapshot(now()).uploads_in_window, 0);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_end_drops_gate_state() {
        let registry = registry();
        let event = Uuid::new_v4();

        registry
            .get_or_create(event, "phone-a", now())
            .gate()
            .record_success(now());
        assert!(registry.end(event, "phone-a"));
        assert!(!registry.end(event, "phone-a"));

        let fresh = registry.get_or_create(event, "phone-a", now());
        assert_eq!(fresh.gate().snapshot(now()).uploads_in_window, 0);
    }

    #[test]
    fn test_sweep_idle() {
        let registry = registry();
        let event = Uuid::new_v4();

        registry.get_or_create(event, "stale", now());
        registry.get_or_create(event, "fresh", now() + TimeDelta::minutes(50));

        assert_eq!(registry.sweep_idle(now() + TimeDelta::minutes(61)), 1);
        assert!(registry.get(event, "stale").is_none());
        assert!(registry.get(event, "fresh").is_some());
    }

    #[tokio::test]
    async fn test_attempts_are_serialised() {
        let registry = registry();
        let session = registry.get_or_create(Uuid::new_v4(), "phone-a", now());

        let guard = session.begin_attempt().await;
        assert!(session.attempt.try_lock().is_err());
        drop(guard);
        assert!(session.attempt.try_lock().is_ok());
    }
}
