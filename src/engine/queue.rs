//! Priority queue of waiting session ids — data model §3.
//!
//! Strict priority, FIFO among equal priorities. Insertion finds the first
//! existing entry with strictly lower priority and inserts before it
//! (append if none), which is the classic way to get a stable
//! priority-then-FIFO order out of a plain `VecDeque` without needing a
//! full binary heap (heaps don't preserve insertion order among equal
//! keys without extra bookkeeping, and this queue is never large enough —
//! bounded by concurrently-waiting clients — for O(n) insertion to matter).

use std::collections::VecDeque;

use crate::ids::SessionId;

#[derive(Default)]
pub struct PriorityQueue {
    entries: VecDeque<(SessionId, i64)>,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, session_id: SessionId, priority: i64) {
        let pos = self
            .entries
            .iter()
            .position(|(_, p)| *p < priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, (session_id, priority));
    }

    pub fn pop_front(&mut self) -> Option<SessionId> {
        self.entries.pop_front().map(|(id, _)| id)
    }

    /// Idempotent: removing an id not present is a no-op.
    pub fn remove(&mut self, session_id: &SessionId) -> bool {
        if let Some(pos) = self.entries.iter().position(|(id, _)| id == session_id) {
            self.entries.remove(pos);
            true
        } else {
            false
        }
    }

    /// 1-based position of `session_id`, or `None` if absent.
    pub fn position(&self, session_id: &SessionId) -> Option<usize> {
        self.entries
            .iter()
            .position(|(id, _)| id == session_id)
            .map(|i| i + 1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(s: &str) -> SessionId {
        SessionId::from(s.to_string())
    }

    #[test]
    fn strict_priority_with_fifo_among_equals() {
        let mut q = PriorityQueue::new();
        q.push(sid("low"), 0);
        q.push(sid("hi"), 10);
        assert_eq!(q.position(&sid("hi")), Some(1));
        assert_eq!(q.position(&sid("low")), Some(2));
    }

    #[test]
    fn fifo_within_same_priority() {
        let mut q = PriorityQueue::new();
        q.push(sid("a"), 5);
        q.push(sid("b"), 5);
        q.push(sid("c"), 5);
        assert_eq!(q.pop_front(), Some(sid("a")));
        assert_eq!(q.pop_front(), Some(sid("b")));
        assert_eq!(q.pop_front(), Some(sid("c")));
    }

    #[test]
    fn remove_is_idempotent() {
        let mut q = PriorityQueue::new();
        q.push(sid("a"), 0);
        assert!(q.remove(&sid("a")));
        assert!(!q.remove(&sid("a")));
    }

    #[test]
    fn insertion_order_preserved_under_arbitrary_sequence() {
        let mut q = PriorityQueue::new();
        for (id, p) in [("a", 1), ("b", 3), ("c", 2), ("d", 3), ("e", 1)] {
            q.push(sid(id), p);
        }
        let order: Vec<_> = std::iter::from_fn(|| q.pop_front())
            .map(|s| s.as_str().to_string())
            .collect();
        assert_eq!(order, vec!["b", "d", "c", "a", "e"]);
    }
}
