// Mcp-Session-Id bookkeeping for the HTTP transport

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;
use uuid::Uuid;

/// Header carrying the session id
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Sessions handed out on `initialize`, expired after a period of silence
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Instant>>,
}

impl SessionStore {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session and return its id
    #[inline]
    pub fn create(&self) -> String {
        let id = Uuid::new_v4().to_string();
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(id.clone(), Instant::now());
        }
        debug!("Opened session {}", id);
        id
    }

    /// Mark a session as used; false when it is unknown or expired
    #[inline]
    pub fn touch(&self, id: &str) -> bool {
        self.sessions
            .lock()
            .ok()
            .and_then(|mut sessions| sessions.get_mut(id).map(|last| *last = Instant::now()))
            .is_some()
    }

    #[inline]
    pub fn remove(&self, id: &str) -> bool {
        self.sessions
            .lock()
            .is_ok_and(|mut sessions| sessions.remove(id).is_some())
    }

    /// Drop sessions silent for longer than `idle`; returns how many
    #[inline]
    pub fn expire_idle(&self, idle: Duration) -> usize {
        let Ok(mut sessions) = self.sessions.lock() else {
            return 0;
        };
        let before = sessions.len();
        sessions.retain(|_, last| last.elapsed() <= idle);
        before - sessions.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.sessions.lock().map_or(0, |sessions| sessions.len())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
