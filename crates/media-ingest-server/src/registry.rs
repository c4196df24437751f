//! Active ingest connection tracking.
//!
//! Membership set of connections whose ingest session is currently streaming.

use std::collections::HashSet;
use std::fmt;
use std::sync::Mutex;

use uuid::Uuid;

/// Identity of one upgraded ingest connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ingest-{}", self.0)
    }
}

/// Shared set of live ingest connections.
///
/// The lock is held only for the set mutation itself.
#[derive(Default)]
pub struct ConnectionRegistry {
    active: Mutex<HashSet<ConnectionId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection; re-registering an existing id is a no-op.
    pub fn register(&self, id: ConnectionId) {
        if let Ok(mut active) = self.active.lock() {
            active.insert(id);
        }
    }

    /// Remove a connection; unknown ids are ignored.
    pub fn unregister(&self, id: ConnectionId) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&id);
        }
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.active
            .lock()
            .map(|active| active.contains(&id))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.active.lock().map(|active| active.len()).unwrap_or(0)
    }
}
