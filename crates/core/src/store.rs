//! Contract for the durable session store.

use crate::session::{Session, Turn};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Durable key-value persistence for sessions, keyed by session id.
///
/// The controller writes through on every processed turn: one full-state
/// upsert plus one history append. Reads only happen on a cold cache, when a
/// session is resumed after a process restart.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn upsert_session(&self, session: &Session) -> Result<()>;
    async fn load_session(&self, session_id: &str) -> Result<Option<Session>>;
    async fn append_turn(&self, session_id: &str, turn: &Turn) -> Result<()>;
}

/// A `SessionStore` held entirely in memory, for tests and offline
/// development.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    turns: Mutex<HashMap<String, Vec<Turn>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded history for a session, oldest first.
    pub fn turns(&self, session_id: &str) -> Vec<Turn> {
        self.turns
            .lock()
            .expect("turn map poisoned")
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn upsert_session(&self, session: &Session) -> Result<()> {
        self.sessions
            .lock()
            .expect("session map poisoned")
            .insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn load_session(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self
            .sessions
            .lock()
            .expect("session map poisoned")
            .get(session_id)
            .cloned())
    }

    async fn append_turn(&self, session_id: &str, turn: &Turn) -> Result<()> {
        self.turns
            .lock()
            .expect("turn map poisoned")
            .entry(session_id.to_string())
            .or_default()
            .push(turn.clone());
        Ok(())
    }
}
