//! Opaque identifiers for stream nodes and client sessions.
//!
//! Kept as distinct newtypes (rather than raw integers or strings) so the
//! engine's public API can't be called with a node id where a session id
//! belongs, or vice versa.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use salvo::oapi::ToSchema;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Identifier for a registered [`StreamNode`](crate::engine::node::StreamNode).
///
/// Assigned on registration from a monotonic counter; nodes are short-lived
/// and compared often (eligibility scans), so a cheap `u64` beats a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub struct NodeId(u64);

impl NodeId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node_{}", self.0)
    }
}

/// Identifier for a [`ClientSession`](crate::session::ClientSession).
///
/// Format: `session_<unix_ms>_<9 base36 chars>`, chosen to match the shape
/// the matchmaker's session ids have always had (roughly sortable by
/// creation time, opaque to clients) without depending on wall-clock time
/// for uniqueness — the random suffix carries that.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate(now_ms: u64) -> Self {
        let suffix = Ulid::new().to_string();
        let suffix: String = suffix.chars().rev().take(9).collect();
        Self(format!("session_{now_ms}_{suffix}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Generates the next [`NodeId`]. Free function (rather than a method on an
/// id-source struct) since node ids have no per-registry state worth owning.
pub fn next_node_id() -> NodeId {
    NodeId::next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_unique_and_increasing() {
        let a = next_node_id();
        let b = next_node_id();
        assert_ne!(a, b);
    }

    #[test]
    fn session_ids_have_expected_shape() {
        let id = SessionId::generate(1_700_000_000_000);
        assert!(id.as_str().starts_with("session_1700000000000_"));
        assert_eq!(id.as_str().split('_').nth(2).unwrap().len(), 9);
    }
}
