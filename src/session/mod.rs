//! Session state: tokens, read markers and login redirects
//!
//! Everything here survives restarts through one persisted key-value file.

pub mod storage;
pub mod tokens;

use std::sync::{Arc, RwLock};

use tracing::info;

pub use storage::{KeyValueStore, StoreError};
pub use tokens::{MemoryTokenStore, PersistentTokenStore, TokenPair, TokenStore};

/// Entry point the session is sent to when it ends
pub const LOGIN_PATH: &str = "/login";

/// Key prefix for per-entity "last read" timestamps
const READ_MARKER_PREFIX: &str = "ticket_last_read_";

/// Receives client-side navigation requests
pub trait Navigator: Send + Sync {
    fn navigate(&self, location: &str);
}

/// Navigator that remembers the last requested location
///
/// The daemon has no window to redirect, so the pending location is reported
/// through the IPC status reply and cleared on the next login.
#[derive(Default)]
pub struct StatusNavigator {
    pending: RwLock<Option<String>>,
}

impl StatusNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> Option<String> {
        self.pending.read().unwrap().clone()
    }

    pub fn clear(&self) {
        *self.pending.write().unwrap() = None;
    }
}

impl Navigator for StatusNavigator {
    fn navigate(&self, location: &str) {
        info!(location = location, "Redirecting client");
        *self.pending.write().unwrap() = Some(location.to_string());
    }
}

/// Per-ticket "last read" timestamps, read by the unread badges
#[derive(Clone)]
pub struct ReadMarkers {
    storage: Arc<KeyValueStore>,
}

impl ReadMarkers {
    pub fn new(storage: Arc<KeyValueStore>) -> Self {
        Self { storage }
    }

    /// Record the newest timestamp the user has seen for `entity_id`
    pub fn mark(&self, entity_id: &str, timestamp: &str) -> Result<(), StoreError> {
        self.storage.set(&marker_key(entity_id), timestamp)
    }

    pub fn get(&self, entity_id: &str) -> Option<String> {
        self.storage.get(&marker_key(entity_id))
    }
}

fn marker_key(entity_id: &str) -> String {
    format!("{}{}", READ_MARKER_PREFIX, entity_id)
}
