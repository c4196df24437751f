//! Shared application state.
//!
//! Owned by the HTTP server and handed to every handler and ingest session.

use std::sync::Arc;

use crate::ingest::IngestLimits;
use crate::registry::ConnectionRegistry;
use crate::store::MediaStore;

pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub store: Arc<MediaStore>,
    pub limits: IngestLimits,
}

impl AppState {
    pub fn new(store: MediaStore, limits: IngestLimits) -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            store: Arc::new(store),
            limits,
        }
    }
}
