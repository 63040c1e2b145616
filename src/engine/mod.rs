//! Matchmaker Engine — component 4.1.
//!
//! The registry of stream nodes, the priority wait queue, the assignment
//! policy, and the liveness/cleanup timers. Logically single-writer: node
//! registry and queue mutations are guarded by one [`parking_lot`]-free
//! `std::sync::Mutex` held only across the body of each public operation,
//! never across an `.await` — subscriber delivery (`NotificationBus::publish`)
//! is synchronous, so this holds even though `Engine`'s methods are `async`
//! for symmetry with the edge adapters that call them.

pub mod node;
pub mod queue;

use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use salvo::oapi::ToSchema;
use serde::Serialize;

use crate::bus::{Event, NotificationBus};
use crate::clock::Clock;
use crate::config::MatchmakerConfig;
use crate::ids::{NodeId, SessionId, next_node_id};
use crate::protocol::{MessageKind, NodeMessage};
use crate::session::{ClientSession, SessionStatus, SessionStore};
use node::{StreamNode, ASSIGNMENT_COOLDOWN_MS, STALE_NODE_THRESHOLD_MS};
use queue::PriorityQueue;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QueuePosition {
    pub position: usize,
    pub total_in_queue: usize,
    pub eta_ms: u64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EngineStats {
    pub total_nodes: usize,
    pub eligible_nodes: usize,
    pub connected_clients: u32,
    pub queue_length: usize,
    pub session_count: usize,
}

struct Registry {
    nodes: IndexMap<NodeId, StreamNode>,
    queue: PriorityQueue,
}

/// The matchmaker engine. Cheap to clone (internally `Arc`-shared) so both
/// the HTTP/WS edge and the TCP node listener can hold their own handle.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Mutex<Registry>,
    sessions: SessionStore,
    bus: NotificationBus,
    clock: Arc<dyn Clock>,
    config: MatchmakerConfig,
    shutdown: tokio_util::sync::CancellationToken,
}

impl Engine {
    pub fn new(clock: Arc<dyn Clock>, bus: NotificationBus, config: MatchmakerConfig) -> Self {
        let sessions = SessionStore::new(clock.clone(), bus.clone());
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(Registry {
                    nodes: IndexMap::new(),
                    queue: PriorityQueue::new(),
                }),
                sessions,
                bus,
                clock,
                config,
                shutdown: tokio_util::sync::CancellationToken::new(),
            }),
        }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.inner.bus.subscribe()
    }

    /// The token that drives the `Running -> Draining -> Stopped` shutdown
    /// sequence. Shared with every [`crate::clock::Scheduler`] so sweeps and
    /// health evaluation stop in lockstep with the edge listeners, and with
    /// WS connections so they can push a final `serverShutdown` frame.
    pub fn shutdown_token(&self) -> tokio_util::sync::CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Begins the drain: no new periodic task iteration or WS wait starts
    /// after this fires.
    pub fn begin_shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    fn now_ms(&self) -> u64 {
        self.inner.clock.now_ms()
    }

    /// `registerNode`. Evicts any existing node with the same
    /// `(address, port)` (emitting `nodeUnregistered` for it) before
    /// inserting the new one.
    pub fn register_node(&self, msg: &NodeMessage) -> Option<NodeId> {
        if msg.message_type != MessageKind::Connect {
            return None;
        }
        let address = msg.address.clone()?;
        if address.is_empty() {
            return None;
        }
        let port = msg.port?;

        let now = self.now_ms();
        let id = next_node_id();
        let node = StreamNode {
            id,
            address: address.clone(),
            port,
            secure: msg.https.unwrap_or(false),
            connected_clients: if msg.player_connected.unwrap_or(false) { 1 } else { 0 },
            last_ping_at: now,
            ready: msg.ready.unwrap_or(false),
            cooldown_until: 0,
            metadata: msg
                .metadata
                .clone()
                .map(serde_json::Value::Object)
                .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
            server_id: msg.server_id.clone(),
        };

        let mut registry = self.inner.registry.lock().unwrap();
        if let Some(existing) = registry
            .nodes
            .iter()
            .find(|(_, n)| n.address == address && n.port == port)
            .map(|(id, _)| *id)
        {
            registry.nodes.shift_remove(&existing);
            self.inner.bus.publish(Event::NodeUnregistered { node_id: existing });
        }
        registry.nodes.insert(id, node.clone());
        drop(registry);

        self.inner.bus.publish(Event::NodeRegistered { node });
        Some(id)
    }

    /// `updateNode`. Unknown node ids are logged and ignored, never an error.
    pub fn update_node(&self, node_id: NodeId, msg: &NodeMessage) {
        let now = self.now_ms();
        let mut registry = self.inner.registry.lock().unwrap();
        let Some(node) = registry.nodes.get_mut(&node_id) else {
            tracing::warn!(%node_id, "updateNode for unknown node");
            return;
        };

        match msg.message_type {
            MessageKind::StreamerConnected => node.ready = true,
            MessageKind::StreamerDisconnected => node.ready = false,
            MessageKind::ClientConnected => node.increment_clients(),
            MessageKind::ClientDisconnected => node.decrement_clients(),
            MessageKind::Ping => node.last_ping_at = now,
            MessageKind::Connect => {}
        }
        let updated = node.clone();
        drop(registry);
        self.inner.bus.publish(Event::NodeUpdated { node: updated });
    }

    /// `unregisterNode`. Removing an id already absent is a no-op.
    pub fn unregister_node(&self, node_id: NodeId) {
        let mut registry = self.inner.registry.lock().unwrap();
        if registry.nodes.shift_remove(&node_id).is_some() {
            drop(registry);
            self.inner.bus.publish(Event::NodeUnregistered { node_id });
        }
    }

    /// `acquireNode`. First eligible node in insertion order; sets its
    /// cooldown inside the same lock that found it, closing the race window
    /// between selection and the node's next `clientConnected`.
    pub fn acquire_node(&self) -> Option<StreamNode> {
        let now = self.now_ms();
        let mut registry = self.inner.registry.lock().unwrap();
        let id = registry
            .nodes
            .iter()
            .find(|(_, n)| n.is_eligible(now))
            .map(|(id, _)| *id)?;
        let node = registry.nodes.get_mut(&id).unwrap();
        node.cooldown_until = now + ASSIGNMENT_COOLDOWN_MS;
        Some(node.clone())
    }

    /// `enqueue`. Creates a `Queued` session in the store and inserts it
    /// into the priority queue under the same lock so the two never
    /// disagree about membership.
    pub fn enqueue(&self, client_id: Option<String>, priority: i64) -> ClientSession {
        let session = self.inner.sessions.create(client_id, priority);
        {
            let mut registry = self.inner.registry.lock().unwrap();
            registry.queue.push(session.id.clone(), priority);
        }
        self.inner.bus.publish(Event::SessionQueued { session: session.clone() });
        session
    }

    /// `queuePosition`.
    pub fn queue_position(&self, session_id: &SessionId) -> Option<QueuePosition> {
        let registry = self.inner.registry.lock().unwrap();
        let position = registry.queue.position(session_id)?;
        let total = registry.queue.len();
        drop(registry);
        Some(QueuePosition {
            position,
            total_in_queue: total,
            eta_ms: position as u64 * self.inner.config.average_hold_ms,
        })
    }

    /// `drainQueue`. Assigns as many waiting sessions to eligible nodes as
    /// possible, stopping at the first miss. Returns whether at least one
    /// assignment happened.
    pub fn drain_queue(&self) -> bool {
        let mut assigned_any = false;
        loop {
            let now = self.now_ms();
            let (session_id, node) = {
                let mut registry = self.inner.registry.lock().unwrap();
                let Some(node_id) = registry
                    .nodes
                    .iter()
                    .find(|(_, n)| n.is_eligible(now))
                    .map(|(id, _)| *id)
                else {
                    break;
                };
                let Some(session_id) = registry.queue.pop_front() else {
                    // No waiters; put the node back untouched (we never
                    // mutated it) and stop.
                    break;
                };
                let node = registry.nodes.get_mut(&node_id).unwrap();
                node.cooldown_until = now + ASSIGNMENT_COOLDOWN_MS;
                let node = node.clone();
                (session_id, node)
            };

            self.inner.sessions.bind_node(&session_id, node.id);
            self.inner.sessions.update_status(&session_id, SessionStatus::Connected);
            self.inner.sessions.update_activity(&session_id);
            let session = match self.inner.sessions.get_by_id(&session_id) {
                Some(s) => s,
                None => continue,
            };
            self.inner
                .bus
                .publish(Event::SessionAssigned { session, node });
            assigned_any = true;
        }
        assigned_any
    }

    /// `removeSession`. Idempotent: removes the session from the queue (if
    /// present) and the store.
    pub fn remove_session(&self, session_id: &SessionId) {
        {
            let mut registry = self.inner.registry.lock().unwrap();
            registry.queue.remove(session_id);
        }
        self.inner.sessions.remove(session_id);
    }

    pub fn get_session(&self, session_id: &SessionId) -> Option<ClientSession> {
        self.inner.sessions.get_by_id(session_id)
    }

    pub fn update_session_activity(&self, session_id: &SessionId) -> bool {
        self.inner.sessions.update_activity(session_id)
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.inner.sessions
    }

    /// `stats`. Read-only registry + queue + session snapshot.
    pub fn stats(&self) -> EngineStats {
        let now = self.now_ms();
        let registry = self.inner.registry.lock().unwrap();
        let total_nodes = registry.nodes.len();
        let eligible_nodes = registry.nodes.values().filter(|n| n.is_eligible(now)).count();
        let connected_clients = registry.nodes.values().map(|n| n.connected_clients).sum();
        let queue_length = registry.queue.len();
        drop(registry);
        EngineStats {
            total_nodes,
            eligible_nodes,
            connected_clients,
            queue_length,
            session_count: self.inner.sessions.len(),
        }
    }

    pub fn nodes_snapshot(&self) -> Vec<StreamNode> {
        self.inner
            .registry
            .lock()
            .unwrap()
            .nodes
            .values()
            .cloned()
            .collect()
    }

    /// Stale-node sweep: nodes with no ping in over
    /// [`STALE_NODE_THRESHOLD_MS`] are unregistered.
    pub fn sweep_stale_nodes(&self) -> usize {
        let now = self.now_ms();
        let stale: Vec<NodeId> = {
            let registry = self.inner.registry.lock().unwrap();
            registry
                .nodes
                .iter()
                .filter(|(_, n)| now.saturating_sub(n.last_ping_at) > STALE_NODE_THRESHOLD_MS)
                .map(|(id, _)| *id)
                .collect()
        };
        for id in &stale {
            self.unregister_node(*id);
        }
        stale.len()
    }

    /// Session sweep: expired sessions (idle longer than
    /// `sessionTimeoutMs`) are removed; emits `sweepCompleted(n)` once.
    pub fn sweep_expired_sessions(&self) -> usize {
        let expired = self.inner.sessions.expired_snapshot(self.inner.config.session_timeout_ms);
        for id in &expired {
            self.remove_session(id);
        }
        if !expired.is_empty() {
            self.inner.bus.publish(Event::SweepCompleted { removed: expired.len() });
        }
        expired.len()
    }

    pub fn config(&self) -> &MatchmakerConfig {
        &self.inner.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use std::time::Duration;

    fn engine() -> (Engine, VirtualClock) {
        let clock = VirtualClock::new();
        let engine = Engine::new(
            Arc::new(clock.clone()),
            NotificationBus::new(),
            MatchmakerConfig::default(),
        );
        (engine, clock)
    }

    fn connect_msg(address: &str, port: u16, ready: bool, player_connected: bool) -> NodeMessage {
        NodeMessage {
            message_type: MessageKind::Connect,
            address: Some(address.to_string()),
            port: Some(port),
            https: Some(false),
            ready: Some(ready),
            player_connected: Some(player_connected),
            server_id: None,
            client_id: None,
            metadata: None,
        }
    }

    #[test]
    fn scenario_single_ready_node_single_client() {
        let (engine, clock) = engine();
        engine.register_node(&connect_msg("10.0.0.1", 8080, true, false));
        clock.advance(Duration::from_millis(5));
        let node = engine.acquire_node().expect("node should be eligible");
        assert_eq!((node.address.as_str(), node.port), ("10.0.0.1", 8080));
        assert_eq!(node.cooldown_until, clock.now_ms() + ASSIGNMENT_COOLDOWN_MS);
    }

    #[test]
    fn scenario_priority_ordering() {
        let (engine, _clock) = engine();
        let low = engine.enqueue(Some("low".into()), 0);
        let hi = engine.enqueue(Some("hi".into()), 10);
        assert_eq!(engine.queue_position(&hi.id).unwrap().position, 1);
        assert_eq!(engine.queue_position(&low.id).unwrap().position, 2);
    }

    #[test]
    fn scenario_drain_on_arrival() {
        let (engine, _clock) = engine();
        let c1 = engine.enqueue(Some("c1".into()), 0);
        assert!(!engine.drain_queue());

        let node_id = engine
            .register_node(&connect_msg("10.0.0.2", 8080, true, false))
            .unwrap();
        assert!(engine.drain_queue());

        let session = engine.get_session(&c1.id).unwrap();
        assert_eq!(session.status, SessionStatus::Connected);
        assert_eq!(session.node_id, Some(node_id));
        assert_eq!(engine.stats().queue_length, 0);
    }

    #[test]
    fn scenario_player_already_attached() {
        let (engine, _clock) = engine();
        engine.register_node(&connect_msg("10.0.0.3", 8080, true, true));
        let stats = engine.stats();
        assert_eq!(stats.eligible_nodes, 0);
        assert_eq!(stats.connected_clients, 1);
        assert!(engine.acquire_node().is_none());
    }

    #[test]
    fn scenario_ping_liveness_sweep() {
        let (engine, clock) = engine();
        engine.register_node(&connect_msg("10.0.0.4", 8080, true, false));
        clock.advance(Duration::from_millis(STALE_NODE_THRESHOLD_MS + 10_000));
        assert_eq!(engine.sweep_stale_nodes(), 1);
        assert_eq!(engine.stats().total_nodes, 0);
    }

    #[test]
    fn stale_sweep_boundary_119s_120s() {
        let (engine, clock) = engine();
        engine.register_node(&connect_msg("10.0.0.5", 8080, true, false));
        clock.advance(Duration::from_millis(119_000));
        assert_eq!(engine.sweep_stale_nodes(), 0);
        clock.advance(Duration::from_millis(1_001));
        assert_eq!(engine.sweep_stale_nodes(), 1);
    }

    #[test]
    fn scenario_session_expiry() {
        let (engine, clock) = engine();
        let mut config = MatchmakerConfig::default();
        config.session_timeout_ms = 30_000;
        let engine = Engine::new(
            Arc::new(clock.clone()),
            NotificationBus::new(),
            config,
        );
        let s = engine.enqueue(Some("c1".into()), 0);
        clock.advance(Duration::from_millis(31_000));
        assert_eq!(engine.sweep_expired_sessions(), 1);
        assert!(engine.get_session(&s.id).is_none());
    }

    #[test]
    fn connected_clients_never_negative() {
        let (engine, _clock) = engine();
        let id = engine
            .register_node(&connect_msg("10.0.0.6", 8080, true, false))
            .unwrap();
        let msg = NodeMessage {
            message_type: MessageKind::ClientDisconnected,
            ..connect_msg("10.0.0.6", 8080, true, false)
        };
        engine.update_node(id, &msg);
        let node = engine.nodes_snapshot().into_iter().find(|n| n.id == id).unwrap();
        assert_eq!(node.connected_clients, 0);
    }

    #[test]
    fn cooldown_prevents_second_acquire() {
        let (engine, clock) = engine();
        engine.register_node(&connect_msg("10.0.0.7", 8080, true, false));
        assert!(engine.acquire_node().is_some());
        clock.advance(Duration::from_millis(ASSIGNMENT_COOLDOWN_MS - 1));
        assert!(engine.acquire_node().is_none());
    }

    #[test]
    fn reregistration_evicts_prior_entry() {
        let (engine, _clock) = engine();
        let first = engine
            .register_node(&connect_msg("10.0.0.8", 8080, true, false))
            .unwrap();
        let second = engine
            .register_node(&connect_msg("10.0.0.8", 8080, true, false))
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(engine.stats().total_nodes, 1);
    }

    #[test]
    fn enqueue_then_remove_restores_queue_length() {
        let (engine, _clock) = engine();
        let before = engine.stats().queue_length;
        let s = engine.enqueue(None, 0);
        engine.remove_session(&s.id);
        assert_eq!(engine.stats().queue_length, before);
    }
}
