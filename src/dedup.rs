//! Inbound event dedup guard
//!
//! A best-effort recency window over the last N event ids, not a full
//! ledger: once an id has been evicted a redelivery passes again.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

/// Window size used by the transport
pub const DEFAULT_CAPACITY: usize = 1000;

/// Event types that are subject to dedup by default
pub const DEFAULT_TRACKED_TYPES: &[&str] = &["message", "app_mention", "assistant"];

#[derive(Default)]
struct Window {
    order: VecDeque<String>,
    members: HashSet<String>,
}

/// Fixed-capacity ring of recently seen event ids with oldest-eviction
pub struct EventDedupGuard {
    capacity: usize,
    tracked_types: HashSet<String>,
    window: Mutex<Window>,
}

impl Default for EventDedupGuard {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TRACKED_TYPES.iter().copied())
    }
}

impl EventDedupGuard {
    pub fn new<'a>(capacity: usize, tracked_types: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            capacity: capacity.max(1),
            tracked_types: tracked_types.into_iter().map(String::from).collect(),
            window: Mutex::new(Window::default()),
        }
    }

    /// Atomic check-and-insert.
    ///
    /// Returns `true` if `event_id` is already in the window; otherwise
    /// records it (evicting the oldest id when full) and returns `false`.
    pub fn seen(&self, event_id: &str) -> bool {
        let mut window = self
            .window
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if window.members.contains(event_id) {
            return true;
        }

        if window.order.len() >= self.capacity {
            if let Some(oldest) = window.order.pop_front() {
                window.members.remove(&oldest);
            }
        }
        window.order.push_back(event_id.to_string());
        window.members.insert(event_id.to_string());
        false
    }

    /// Whether an inbound event should be dropped as a redelivery.
    ///
    /// Untracked types and events without an id always pass.
    pub fn is_duplicate(&self, event_type: &str, event_id: Option<&str>) -> bool {
        match event_id {
            Some(id) if self.tracked_types.contains(event_type) => self.seen(id),
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.window
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .order
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
