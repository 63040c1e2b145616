//! Notification Bus — typed fan-out of engine events to edge adapters.
//!
//! Subscribers are in-process `tokio::sync::broadcast` receivers. Delivery
//! is best-effort and in event order: a slow subscriber that falls behind
//! the broadcast channel's capacity silently misses the oldest events
//! (`RecvError::Lagged`) rather than stalling the engine. The engine never
//! awaits a subscriber — `publish` is a synchronous, non-blocking send.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::engine::node::StreamNode;
use crate::ids::{NodeId, SessionId};
use crate::session::{ClientSession, SessionStatus};

const BUS_CAPACITY: usize = 1024;

/// One entry per event kind named in the spec's Notification Bus section.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    NodeRegistered { node: StreamNode },
    NodeUpdated { node: StreamNode },
    NodeUnregistered { node_id: NodeId },
    SessionCreated { session: ClientSession },
    SessionQueued { session: ClientSession },
    SessionAssigned { session: ClientSession, node: StreamNode },
    SessionStatusChanged {
        session_id: SessionId,
        old: SessionStatus,
        new: SessionStatus,
    },
    SessionRemoved { session_id: SessionId },
    HealthChanged {
        check: String,
        old: crate::health::HealthStatus,
        new: crate::health::HealthStatus,
    },
    ServiceUnhealthy { check: String },
    RecoveryOk { check: String },
    RecoveryFail { check: String, error: String },
    SweepCompleted { removed: usize },
}

/// In-process typed pub/sub surface.
#[derive(Clone)]
pub struct NotificationBus {
    sender: broadcast::Sender<Event>,
}

impl NotificationBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }

    /// Subscribe to the bus. Each subscriber gets its own queue of up to
    /// [`BUS_CAPACITY`] unconsumed events before it starts lagging.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Publish an event. Never blocks, never errors back into the caller —
    /// with no subscribers this is simply a no-op.
    pub fn publish(&self, event: Event) {
        let _ = self.sender.send(event);
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}
