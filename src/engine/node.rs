//! `StreamNode` — a registered streaming server, per data model §3.

use salvo::oapi::ToSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::NodeId;

/// Assignment cooldown: once a node is handed to `acquireNode`, it is
/// ineligible for a further `10s` to give the node time to report
/// `clientConnected` before a second client can race onto it.
pub const ASSIGNMENT_COOLDOWN_MS: u64 = 10_000;

/// Stale-node sweep threshold: a node with no `ping` in this long is
/// presumed dead and unregistered.
pub const STALE_NODE_THRESHOLD_MS: u64 = 120_000;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StreamNode {
    pub id: NodeId,
    pub address: String,
    pub port: u16,
    pub secure: bool,
    pub connected_clients: u32,
    pub last_ping_at: u64,
    pub ready: bool,
    pub cooldown_until: u64,
    pub metadata: Value,
    pub server_id: Option<String>,
}

impl StreamNode {
    /// A node is eligible iff ready, unattached, and past its cooldown.
    pub fn is_eligible(&self, now_ms: u64) -> bool {
        self.ready && self.connected_clients == 0 && now_ms >= self.cooldown_until
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn increment_clients(&mut self) {
        self.connected_clients = self.connected_clients.saturating_add(1);
    }

    /// `connectedClients` never goes below zero even on a spurious
    /// `clientDisconnected`; when it reaches zero the node becomes
    /// immediately eligible again (cooldown reset).
    pub fn decrement_clients(&mut self) {
        self.connected_clients = self.connected_clients.saturating_sub(1);
        if self.connected_clients == 0 {
            self.cooldown_until = 0;
        }
    }
}
