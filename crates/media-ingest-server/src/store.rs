//! Persistent media store.
//!
//! A single file holding the raw bytes of the most recently finalized stream.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use actix_web::HttpResponse;
use uuid::Uuid;

/// Media type declared on playback responses.
pub const MEDIA_CONTENT_TYPE: &str = "video/webm";

/// Default store location, relative to the working directory.
pub const DEFAULT_STORE_PATH: &str = "media_data.raw";

/// Failure writing the store; logged by the finalizer, never sent to a client.
#[derive(Debug)]
pub struct PersistError {
    pub path: PathBuf,
    pub source: io::Error,
}

impl fmt::Display for PersistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "persist {}: {}", self.path.display(), self.source)
    }
}

impl std::error::Error for PersistError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Failure reading the store for playback.
#[derive(Debug)]
pub struct RetrievalError {
    pub path: PathBuf,
    pub source: io::Error,
}

impl RetrievalError {
    /// Convert a retrieval error into an HTTP response.
    pub fn into_response(self) -> HttpResponse {
        HttpResponse::InternalServerError().body("Could not read media file")
    }
}

impl fmt::Display for RetrievalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "read {}: {}", self.path.display(), self.source)
    }
}

impl std::error::Error for RetrievalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

pub struct MediaStore {
    path: PathBuf,
}

impl MediaStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the stored bytes with `data`.
    ///
    /// Writes a sibling temp file and renames it over the target, so readers
    /// see either the previous contents or the new ones.
    pub fn persist(&self, data: &[u8]) -> Result<(), PersistError> {
        let tmp = self.temp_path();
        write_then_rename(&tmp, &self.path, data).map_err(|source| {
            let _ = fs::remove_file(&tmp);
            PersistError {
                path: self.path.clone(),
                source,
            }
        })
    }

    /// Read the full stored blob.
    pub async fn retrieve(&self) -> Result<Vec<u8>, RetrievalError> {
        tokio::fs::read(&self.path)
            .await
            .map_err(|source| RetrievalError {
                path: self.path.clone(),
                source,
            })
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "media".to_string());
        self.path
            .with_file_name(format!(".{name}.{}.tmp", Uuid::new_v4().simple()))
    }
}

fn write_then_rename(tmp: &Path, target: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut file = File::create(tmp)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);
    fs::rename(tmp, target)
}
