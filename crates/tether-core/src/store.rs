//! Per-session bounded event log and derived bookkeeping.
//!
//! The raw-event buffer is a hard memory ceiling, not history: capacity 1000
//! per session, oldest evicted first, never persisted beyond the process.
//! Only minimal session bookkeeping outlives this structure.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::events::Event;

/// Hard per-session cap on buffered raw events.
pub const EVENT_LOG_CAPACITY: usize = 1000;

/// Counters maintained alongside the buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationStats {
    /// Total appends over the session's lifetime, including evicted events.
    pub total_events: u64,
    pub last_event_id: Option<String>,
    pub last_invocation_id: Option<String>,
}

#[derive(Debug)]
struct ConversationState {
    events: VecDeque<Event>,
    stats: ConversationStats,
}

impl ConversationState {
    fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            stats: ConversationStats::default(),
        }
    }
}

/// In-memory store of conversation state, keyed by session id.
///
/// Mutation is single-writer-per-session (the dispatcher on arrival), so the
/// coarse lock is uncontended in practice; consumers take snapshots.
#[derive(Debug)]
pub struct ConversationStore {
    sessions: Mutex<HashMap<String, ConversationState>>,
    capacity: usize,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_LOG_CAPACITY)
    }

    /// Capacity override for tests; production uses [`EVENT_LOG_CAPACITY`].
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "event log capacity must be non-zero");
        Self {
            sessions: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// Appends an event to the session's buffer, evicting the oldest entry
    /// on overflow. Append order equals delivery order.
    pub fn append(&self, session_id: &str, event: Event) {
        let mut sessions = self.sessions.lock().expect("store lock poisoned");
        let state = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| ConversationState::new(self.capacity));

        if state.events.len() == self.capacity {
            state.events.pop_front();
        }
        state.stats.total_events += 1;
        state.stats.last_event_id = Some(event.id.clone());
        state.stats.last_invocation_id = Some(event.invocation_id.clone());
        state.events.push_back(event);
    }

    /// Returns the buffered events in arrival order.
    pub fn snapshot(&self, session_id: &str) -> Vec<Event> {
        let sessions = self.sessions.lock().expect("store lock poisoned");
        sessions
            .get(session_id)
            .map(|state| state.events.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn stats(&self, session_id: &str) -> Option<ConversationStats> {
        let sessions = self.sessions.lock().expect("store lock poisoned");
        sessions.get(session_id).map(|state| state.stats.clone())
    }

    pub fn buffered_len(&self, session_id: &str) -> usize {
        let sessions = self.sessions.lock().expect("store lock poisoned");
        sessions.get(session_id).map_or(0, |state| state.events.len())
    }

    /// Drops a session's buffer entirely. Idempotent.
    pub fn remove(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().expect("store lock poisoned");
        sessions.remove(session_id);
    }
}
