// src/storage/memory.rs
use std::collections::HashMap;

use crate::models::server::{Endpoint, ProbeOutcome, ServerRecord};

/// The authoritative directory snapshot. Owned by the engine and only ever
/// mutated from its serialization point.
#[derive(Debug, Default)]
pub struct ServerStorage {
    servers: Vec<ServerRecord>,
}

impl ServerStorage {
    pub fn new() -> Self {
        Self { servers: Vec::new() }
    }

    pub fn from_records(servers: Vec<ServerRecord>) -> Self {
        Self { servers }
    }

    /// Full replace-on-fetch. Stats already known for an endpoint are carried
    /// forward so a refresh doesn't reset every row to unknown.
    pub fn replace_with_merge(&mut self, mut fresh: Vec<ServerRecord>) {
        merge_previous(&mut fresh, &self.servers);
        for server in fresh.iter_mut() {
            server.loading = true;
        }
        self.servers = fresh;
    }

    /// Returns true when the endpoint was not present yet.
    pub fn insert_if_absent(&mut self, record: ServerRecord) -> bool {
        if self.servers.iter().any(|s| s.host == record.host && s.port == record.port) {
            return false;
        }
        self.servers.push(record);
        true
    }

    pub fn apply_outcome(
        &mut self,
        endpoint: &Endpoint,
        outcome: &ProbeOutcome,
    ) -> Option<&ServerRecord> {
        let server = self.servers.iter_mut().find(|s| s.is(endpoint))?;
        server.apply_outcome(outcome);
        Some(server)
    }

    /// A skipped probe: the record keeps its data but stops showing as loading.
    pub fn mark_loaded(&mut self, endpoint: &Endpoint) -> Option<&ServerRecord> {
        let server = self.servers.iter_mut().find(|s| s.is(endpoint))?;
        server.loading = false;
        Some(server)
    }

    pub fn get(&self, endpoint: &Endpoint) -> Option<&ServerRecord> {
        self.servers.iter().find(|s| s.is(endpoint))
    }

    pub fn records(&self) -> &[ServerRecord] {
        &self.servers
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

/// Copies ping, rules and last-updated from `previous` into every fresh record
/// with the same host and port.
pub fn merge_previous(fresh: &mut [ServerRecord], previous: &[ServerRecord]) {
    let known: HashMap<Endpoint, &ServerRecord> =
        previous.iter().map(|s| (s.endpoint(), s)).collect();

    for server in fresh.iter_mut() {
        if let Some(old) = known.get(&server.endpoint()) {
            server.ping = old.ping;
            server.rules = old.rules.clone();
            server.last_updated = old.last_updated;
        }
    }
}
