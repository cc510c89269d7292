//! Per-session conversation history with bounded FIFO retention.
//!
//! Sessions are created lazily on first append and keyed by caller-supplied
//! opaque identifiers. Each session keeps at most `max_turns` exchanges;
//! appending past the bound evicts the oldest turn first. History lives in
//! process memory only; persistence, if wanted, is an external snapshot
//! concern.
//!
//! A single `RwLock` guards the session map. Critical sections are a
//! `VecDeque` push or clone, so cross-session contention stays negligible
//! at this scale; sharding per key is the follow-up if it ever shows up in
//! profiles.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use chrono::Utc;

use crate::models::Turn;

/// Thread-safe store of bounded conversation sessions.
pub struct ConversationStore {
    max_turns: usize,
    sessions: RwLock<HashMap<String, VecDeque<Turn>>>,
}

impl ConversationStore {
    /// `max_turns` is the per-session retention bound; zero keeps nothing.
    pub fn new(max_turns: usize) -> Self {
        ConversationStore {
            max_turns,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    /// Record one exchange, creating the session if absent and evicting the
    /// oldest turn once the bound is exceeded.
    pub fn append(&self, session_id: &str, question: &str, answer: &str) {
        let mut sessions = self.sessions.write().expect("session lock poisoned");
        let turns = sessions.entry(session_id.to_string()).or_default();
        turns.push_back(Turn {
            question: question.to_string(),
            answer: answer.to_string(),
            timestamp: Utc::now(),
        });
        while turns.len() > self.max_turns {
            turns.pop_front();
        }
    }

    /// Ordered turn history, oldest first. Unknown sessions yield an empty
    /// sequence, not an error.
    pub fn history(&self, session_id: &str) -> Vec<Turn> {
        self.sessions
            .read()
            .expect("session lock poisoned")
            .get(session_id)
            .map(|turns| turns.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of turns currently retained for a session.
    pub fn turn_count(&self, session_id: &str) -> usize {
        self.sessions
            .read()
            .expect("session lock poisoned")
            .get(session_id)
            .map(|turns| turns.len())
            .unwrap_or(0)
    }

    /// Drop a session entirely. Absent sessions are a no-op.
    pub fn clear(&self, session_id: &str) {
        self.sessions
            .write()
            .expect("session lock poisoned")
            .remove(session_id);
    }

    /// Reset every session.
    pub fn clear_all(&self) {
        self.sessions
            .write()
            .expect("session lock poisoned")
            .clear();
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.read().expect("session lock poisoned").len()
    }
}
