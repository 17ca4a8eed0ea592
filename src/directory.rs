// src/directory.rs
use log::{debug, info, warn};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::models::server::{Endpoint, ServerRecord};
use crate::utils::{BrowserError, DEFAULT_PORT};

/// One entry of the remote directory, short keys as served by the master list.
#[derive(Debug, Deserialize)]
struct DirectoryEntry {
    #[serde(default)]
    ip: Option<String>,
    #[serde(default)]
    hn: Option<String>,
    #[serde(default)]
    pc: Option<u32>,
    #[serde(default)]
    pm: Option<u32>,
    #[serde(default)]
    gm: Option<String>,
    #[serde(default)]
    la: Option<String>,
    #[serde(default)]
    pa: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct FallbackEntry {
    #[serde(default)]
    name: String,
    host: String,
    #[serde(default)]
    port: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectorySource {
    Remote,
    Fallback,
}

pub struct DirectoryFetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_bytes: usize,
}

impl DirectoryFetcher {
    pub fn new(timeout: Duration, max_bytes: usize) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("Falling back to default HTTP client: {}", e);
                reqwest::Client::new()
            });
        Self { client, timeout, max_bytes }
    }

    /// One bounded-time GET against the directory.
    pub async fn fetch(&self, url: &str) -> Result<Vec<ServerRecord>, BrowserError> {
        let body = self.get_body(url).await?;
        parse_directory(&body)
    }

    /// Remote directory first, then the local server list. Only both failing is
    /// an error, and it carries the remote cause.
    pub async fn fetch_with_fallback(
        &self,
        url: &str,
        fallback: &Path,
    ) -> Result<(Vec<ServerRecord>, DirectorySource), BrowserError> {
        let remote_err = match self.fetch(url).await {
            Ok(servers) => {
                info!("Fetched {} servers from {}", servers.len(), url);
                return Ok((servers, DirectorySource::Remote));
            }
            Err(e) if e.is_fetch_failure() => e,
            Err(e) => return Err(e),
        };

        warn!("Directory fetch failed ({}), trying {}", remote_err, fallback.display());
        match load_fallback(fallback).await {
            Ok(servers) => {
                info!("Loaded {} servers from {}", servers.len(), fallback.display());
                Ok((servers, DirectorySource::Fallback))
            }
            Err(fallback_err) => {
                debug!("Fallback failed: {}", fallback_err);
                Err(BrowserError::Fallback(format!("{} (fallback: {})", remote_err, fallback_err)))
            }
        }
    }

    /// Checks that `url` serves a non-empty directory whose first entry has an
    /// address. Returns the entry count.
    pub async fn check(&self, url: &str) -> Result<usize, BrowserError> {
        if url.trim().is_empty() {
            return Err(BrowserError::Transport("URL cannot be empty".to_string()));
        }
        let body = self.get_body(url).await?;
        let entries: Vec<serde_json::Value> = serde_json::from_slice(&body)
            .map_err(|e| BrowserError::DirectoryDecode(e.to_string()))?;

        let first = entries.first().ok_or(BrowserError::EmptyDirectory)?;
        let has_address = first
            .get("ip")
            .and_then(|ip| ip.as_str())
            .map(|ip| !ip.is_empty())
            .unwrap_or(false);
        if !has_address {
            return Err(BrowserError::DirectoryDecode("missing 'ip' field".to_string()));
        }
        Ok(entries.len())
    }

    async fn get_body(&self, url: &str) -> Result<Vec<u8>, BrowserError> {
        let request = async {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| BrowserError::Transport(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(BrowserError::DirectoryStatus(status.as_u16()));
            }
            if response.content_length().map(|len| len as usize > self.max_bytes).unwrap_or(false) {
                return Err(BrowserError::DirectoryDecode("response too large".to_string()));
            }

            let body = response
                .bytes()
                .await
                .map_err(|e| BrowserError::Transport(e.to_string()))?;
            if body.len() > self.max_bytes {
                return Err(BrowserError::DirectoryDecode("response too large".to_string()));
            }
            Ok::<Vec<u8>, BrowserError>(body.to_vec())
        };

        tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| BrowserError::Transport("request timed out".to_string()))?
    }
}

/// Decodes a directory body. Entries without a usable address are dropped;
/// nothing usable left is `EmptyDirectory`.
pub fn parse_directory(body: &[u8]) -> Result<Vec<ServerRecord>, BrowserError> {
    let raw: Vec<serde_json::Value> =
        serde_json::from_slice(body).map_err(|e| BrowserError::DirectoryDecode(e.to_string()))?;

    let mut servers = Vec::with_capacity(raw.len());
    for value in raw {
        let entry: DirectoryEntry = match serde_json::from_value(value) {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Dropping malformed directory entry: {}", e);
                continue;
            }
        };
        let Some(address) = entry.ip.filter(|ip| !ip.trim().is_empty()) else {
            continue;
        };
        let endpoint = match Endpoint::parse(&address) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                debug!("Dropping directory entry: {}", e);
                continue;
            }
        };

        let mut server = ServerRecord::pending(&endpoint);
        server.name = entry.hn.unwrap_or_default();
        server.players = entry.pc.unwrap_or_default();
        server.max_players = entry.pm.unwrap_or_default();
        server.passworded = entry.pa.unwrap_or_default();
        server.gamemode = entry.gm.filter(|gm| !gm.is_empty());
        server.language = entry.la.filter(|la| !la.is_empty());
        servers.push(server);
    }

    if servers.is_empty() {
        return Err(BrowserError::EmptyDirectory);
    }
    Ok(servers)
}

/// Reads the local server list: a JSON array of `{name, host, port}`.
pub async fn load_fallback(path: &Path) -> Result<Vec<ServerRecord>, BrowserError> {
    let data = tokio::fs::read(path)
        .await
        .map_err(|e| BrowserError::Fallback(format!("{}: {}", path.display(), e)))?;
    let raw: Vec<FallbackEntry> =
        serde_json::from_slice(&data).map_err(|e| BrowserError::DirectoryDecode(e.to_string()))?;

    Ok(raw
        .into_iter()
        .filter(|entry| !entry.host.trim().is_empty())
        .map(|entry| {
            let endpoint = Endpoint::new(entry.host.trim(), entry.port.unwrap_or(DEFAULT_PORT));
            let mut server = ServerRecord::pending(&endpoint);
            server.name = entry.name;
            server
        })
        .collect())
}
