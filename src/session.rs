//! Session Store — component 4.2.
//!
//! Holds the canonical record for every [`ClientSession`]. The matchmaker
//! engine's priority queue only ever stores session ids; this store is
//! where the actual state, timestamps, and priority live. Mirrors the
//! teacher crate's preference for a `DashMap`-backed concurrent registry
//! (see `StreamManager::connections`) over a `Mutex<HashMap<..>>`, since
//! session reads (queue position, activity updates) vastly outnumber the
//! writes that need cross-session atomicity.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::bus::{Event, NotificationBus};
use crate::clock::Clock;
use crate::ids::SessionId;
use std::sync::Arc;

/// Strip angle brackets and surrounding whitespace from a caller-supplied
/// client label, per the data model's sanitation rule.
pub fn sanitize_client_id(raw: &str) -> String {
    raw.trim().replace(['<', '>'], "")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SessionStatus {
    Queued,
    Connected,
    Disconnected,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSession {
    pub id: SessionId,
    pub client_id: Option<String>,
    pub node_id: Option<crate::ids::NodeId>,
    pub created_at: u64,
    pub last_activity_at: u64,
    pub status: SessionStatus,
    pub priority: i64,
}

impl ClientSession {
    fn new(id: SessionId, client_id: Option<String>, priority: i64, now_ms: u64) -> Self {
        Self {
            id,
            client_id,
            node_id: None,
            created_at: now_ms,
            last_activity_at: now_ms,
            status: SessionStatus::Queued,
            priority,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub total: usize,
    pub queued: usize,
    pub connected: usize,
}

/// Concurrent store for [`ClientSession`] records.
pub struct SessionStore {
    sessions: DashMap<SessionId, ClientSession>,
    by_client: DashMap<String, SessionId>,
    clock: Arc<dyn Clock>,
    bus: NotificationBus,
}

impl SessionStore {
    pub fn new(clock: Arc<dyn Clock>, bus: NotificationBus) -> Self {
        Self {
            sessions: DashMap::new(),
            by_client: DashMap::new(),
            clock,
            bus,
        }
    }

    /// Create a new `Queued` session and emit `sessionCreated`.
    pub fn create(&self, client_id: Option<String>, priority: i64) -> ClientSession {
        let now = self.clock.now_ms();
        let id = SessionId::generate(now);
        let client_id = client_id.map(|c| sanitize_client_id(&c)).filter(|c| !c.is_empty());
        let session = ClientSession::new(id.clone(), client_id.clone(), priority, now);

        self.sessions.insert(id.clone(), session.clone());
        if let Some(client_id) = client_id {
            self.by_client.insert(client_id, id);
        }
        self.bus.publish(Event::SessionCreated { session: session.clone() });
        session
    }

    pub fn get_by_id(&self, id: &SessionId) -> Option<ClientSession> {
        self.sessions.get(id).map(|s| s.clone())
    }

    pub fn by_client(&self, client_id: &str) -> Option<ClientSession> {
        let id = self.by_client.get(client_id)?;
        self.get_by_id(&id)
    }

    pub fn update_activity(&self, id: &SessionId) -> bool {
        let now = self.clock.now_ms();
        if let Some(mut entry) = self.sessions.get_mut(id) {
            entry.last_activity_at = now;
            true
        } else {
            false
        }
    }

    /// Transition a session's status, emitting `sessionStatusChanged`.
    /// No-op (returns `false`) for an unknown session id.
    pub fn update_status(&self, id: &SessionId, new: SessionStatus) -> bool {
        let old = match self.sessions.get_mut(id) {
            Some(mut entry) => {
                let old = entry.status;
                entry.status = new;
                entry.last_activity_at = self.clock.now_ms();
                old
            }
            None => return false,
        };
        if old != new {
            self.bus.publish(Event::SessionStatusChanged {
                session_id: id.clone(),
                old,
                new,
            });
        }
        true
    }

    pub fn bind_node(&self, id: &SessionId, node_id: crate::ids::NodeId) {
        if let Some(mut entry) = self.sessions.get_mut(id) {
            entry.node_id = Some(node_id);
        }
    }

    /// Remove a session from the store. Idempotent: removing an unknown id
    /// is a no-op, not an error. Emits `sessionRemoved` only when a record
    /// actually existed.
    pub fn remove(&self, id: &SessionId) -> Option<ClientSession> {
        let removed = self.sessions.remove(id).map(|(_, s)| s);
        if let Some(session) = &removed {
            if let Some(client_id) = &session.client_id {
                self.by_client.remove(client_id);
            }
            self.bus.publish(Event::SessionRemoved { session_id: id.clone() });
        }
        removed
    }

    pub fn by_status(&self, status: SessionStatus) -> Vec<ClientSession> {
        self.sessions
            .iter()
            .filter(|e| e.status == status)
            .map(|e| e.clone())
            .collect()
    }

    /// Sessions whose `lastActivityAt` is older than `session_timeout_ms`.
    pub fn expired_snapshot(&self, session_timeout_ms: u64) -> Vec<SessionId> {
        let now = self.clock.now_ms();
        self.sessions
            .iter()
            .filter(|e| now.saturating_sub(e.last_activity_at) > session_timeout_ms)
            .map(|e| e.id.clone())
            .collect()
    }

    pub fn stats(&self) -> SessionStats {
        let mut queued = 0;
        let mut connected = 0;
        for entry in self.sessions.iter() {
            match entry.status {
                SessionStatus::Queued => queued += 1,
                SessionStatus::Connected => connected += 1,
                _ => {}
            }
        }
        SessionStats {
            total: self.sessions.len(),
            queued,
            connected,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;

    fn store() -> (SessionStore, VirtualClock) {
        let clock = VirtualClock::new();
        let store = SessionStore::new(Arc::new(clock.clone()), NotificationBus::new());
        (store, clock)
    }

    #[test]
    fn sanitizes_client_id() {
        assert_eq!(sanitize_client_id("  <bob>  "), "bob");
    }

    #[test]
    fn create_then_remove_is_idempotent() {
        let (store, _clock) = store();
        let s = store.create(Some("alice".into()), 0);
        assert!(store.remove(&s.id).is_some());
        assert!(store.remove(&s.id).is_none());
    }

    #[test]
    fn expiry_boundary() {
        let (store, clock) = store();
        let s = store.create(None, 0);
        clock.advance(std::time::Duration::from_millis(30_000));
        assert!(store.expired_snapshot(30_000).is_empty());
        clock.advance(std::time::Duration::from_millis(1_001));
        assert_eq!(store.expired_snapshot(30_000), vec![s.id]);
    }
}
