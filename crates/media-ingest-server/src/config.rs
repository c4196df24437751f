//! Configuration loading and parsing.
//!
//! Defines the optional TOML config schema and resolves defaults.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::ingest::IngestLimits;

/// Top-level server configuration loaded from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct ServerConfig {
    /// Bind address (host:port).
    pub bind: Option<String>,
    /// Path of the persisted media file.
    pub store_path: Option<String>,
    /// Largest websocket frame accepted from ingest clients, in bytes.
    pub max_frame_bytes: Option<usize>,
    /// Optional cap on a single session's buffered bytes.
    pub max_buffer_bytes: Option<usize>,
    /// Origins allowed to call the HTTP endpoints from a browser.
    pub cors_origins: Option<Vec<String>>,
}

impl ServerConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<ServerConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }
}

/// Parse an optional bind address from config.
pub fn bind_from_config(cfg: &ServerConfig) -> Result<Option<SocketAddr>> {
    let Some(bind) = cfg.bind.as_deref() else {
        return Ok(None);
    };
    let addr = bind.parse().with_context(|| format!("parse bind {bind}"))?;
    Ok(Some(addr))
}

/// Extract the optional store path from config.
pub fn store_path_from_config(cfg: &ServerConfig) -> Option<PathBuf> {
    cfg.store_path.as_deref().and_then(|path| {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(PathBuf::from(trimmed))
        }
    })
}

/// Resolve ingest limits, rejecting zero-sized values.
pub fn limits_from_config(cfg: &ServerConfig) -> Result<IngestLimits> {
    let defaults = IngestLimits::default();
    let max_frame_bytes = cfg.max_frame_bytes.unwrap_or(defaults.max_frame_bytes);
    if max_frame_bytes == 0 {
        return Err(anyhow::anyhow!("max_frame_bytes must be greater than zero"));
    }
    if cfg.max_buffer_bytes == Some(0) {
        return Err(anyhow::anyhow!("max_buffer_bytes must be greater than zero"));
    }
    Ok(IngestLimits {
        max_frame_bytes,
        max_buffer_bytes: cfg.max_buffer_bytes,
    })
}

/// Non-empty CORS origins from config.
pub fn cors_origins_from_config(cfg: &ServerConfig) -> Vec<String> {
    cfg.cors_origins
        .iter()
        .flatten()
        .map(|origin| origin.trim().trim_end_matches('/').to_string())
        .filter(|origin| !origin.is_empty())
        .collect()
}
