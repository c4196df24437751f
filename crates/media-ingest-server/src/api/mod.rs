//! HTTP API handlers.
//!
//! Defines the Actix routes for stream ingest, playback, and health.

pub mod health;
pub mod ingest;
pub mod playback;

pub use health::*;
pub use ingest::media_ws;
pub use playback::*;
