// src/storage/cache.rs
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::server::ServerRecord;
use crate::utils::BrowserError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEnvelope {
    pub servers: Vec<ServerRecord>,
    pub updated_at: DateTime<Utc>,
}

/// Last known full probe results, usable while younger than `max_age`.
#[derive(Debug, Clone)]
pub struct ResultCache {
    path: PathBuf,
    max_age: Duration,
}

impl ResultCache {
    pub fn new(path: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self { path: path.into(), max_age }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Option<Vec<ServerRecord>> {
        self.load_at(Utc::now())
    }

    /// A missing, unreadable, undecodable or stale envelope is simply absent.
    pub fn load_at(&self, now: DateTime<Utc>) -> Option<Vec<ServerRecord>> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Failed to read cache {}: {}", self.path.display(), e);
                return None;
            }
        };

        let envelope: CacheEnvelope = match serde_json::from_slice(&data) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Ignoring undecodable cache {}: {}", self.path.display(), e);
                return None;
            }
        };

        let fresh = now
            .signed_duration_since(envelope.updated_at)
            .to_std()
            .map(|age| age < self.max_age)
            .unwrap_or(true);
        if !fresh {
            debug!("Cache saved at {} is past its freshness horizon", envelope.updated_at);
            return None;
        }

        Some(envelope.servers)
    }

    pub fn save(&self, servers: &[ServerRecord]) -> Result<(), BrowserError> {
        self.save_at(servers, Utc::now())
    }

    /// Overwrites the whole envelope. Written to a sibling temp file first so a
    /// crash never leaves a half-written cache behind.
    pub fn save_at(
        &self,
        servers: &[ServerRecord],
        now: DateTime<Utc>,
    ) -> Result<(), BrowserError> {
        let envelope = CacheEnvelope { servers: servers.to_vec(), updated_at: now };
        let data = serde_json::to_vec_pretty(&envelope)
            .map_err(|e| BrowserError::CacheIo(e.to_string()))?;

        let dir = match self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            Some(dir) => {
                fs::create_dir_all(dir).map_err(|e| BrowserError::CacheIo(e.to_string()))?;
                dir.to_path_buf()
            }
            None => PathBuf::from("."),
        };

        // Every save gets its own temp file, so two writers never share one.
        let mut tmp = tempfile::Builder::new()
            .prefix(".servers_cache")
            .suffix(".tmp")
            .tempfile_in(&dir)
            .map_err(|e| BrowserError::CacheIo(e.to_string()))?;
        tmp.write_all(&data).map_err(|e| BrowserError::CacheIo(e.to_string()))?;
        tmp.persist(&self.path)
            .map_err(|e| BrowserError::CacheIo(e.error.to_string()))?;
        debug!("Saved {} servers to {}", servers.len(), self.path.display());
        Ok(())
    }
}
