// src/models/server.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::utils::{format_address, parse_address, BrowserError};

pub type Rules = BTreeMap<String, String>;

/// Identity of a server across fetch cycles. Names change, endpoints don't.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    pub fn parse(input: &str) -> Result<Self, BrowserError> {
        let (host, port) = parse_address(input)?;
        Ok(Self { host, port })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_address(&self.host, self.port))
    }
}

/// Live status returned by a status probe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStatus {
    pub name: String,
    pub players: u32,
    pub max_players: u32,
    pub passworded: bool,
    pub ping: Duration,
}

/// A successful status probe plus the best-effort rules probe that followed it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub status: ServerStatus,
    pub rules: Option<Rules>,
    pub probed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerRecord {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub players: u32,
    #[serde(default)]
    pub max_players: u32,
    /// Zero means unknown.
    #[serde(default, rename = "ping_ms", with = "ping_millis")]
    pub ping: Duration,
    #[serde(default)]
    pub passworded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gamemode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<Rules>,
    /// `None` means never probed.
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub loading: bool,
}

impl ServerRecord {
    /// A freshly discovered server: nothing known yet, probe pending.
    pub fn pending(endpoint: &Endpoint) -> Self {
        Self {
            host: endpoint.host.clone(),
            port: endpoint.port,
            loading: true,
            ..Default::default()
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }

    pub fn is(&self, endpoint: &Endpoint) -> bool {
        self.port == endpoint.port && self.host == endpoint.host
    }

    pub fn address(&self) -> String {
        format_address(&self.host, self.port)
    }

    pub fn ping_ms(&self) -> i64 {
        self.ping.as_millis() as i64
    }

    /// True when the record was probed less than `window` before `now`.
    pub fn updated_within(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match self.last_updated {
            Some(at) => now
                .signed_duration_since(at)
                .to_std()
                .map(|age| age < window)
                // A timestamp ahead of `now` counts as fresh.
                .unwrap_or(true),
            None => false,
        }
    }

    /// Status write first, then the rules write when the rules probe succeeded.
    /// Fields a probe does not report are left alone.
    pub fn apply_outcome(&mut self, outcome: &ProbeOutcome) {
        let status = &outcome.status;
        self.name = status.name.clone();
        self.players = status.players;
        self.max_players = status.max_players;
        self.passworded = status.passworded;
        self.ping = status.ping;
        self.last_updated = Some(outcome.probed_at);
        self.loading = false;

        if let Some(rules) = &outcome.rules {
            self.rules = Some(rules.clone());
        }
    }

    pub fn display_name(&self) -> String {
        let name = if self.name.is_empty() { "(unknown)" } else { self.name.as_str() };
        if self.passworded {
            format!("{} [locked]", name)
        } else {
            name.to_string()
        }
    }

    pub fn ping_label(&self) -> String {
        if !self.loading {
            format!("{} ms", self.ping_ms())
        } else if self.last_updated.is_none() {
            "...".to_string()
        } else {
            "-".to_string()
        }
    }

    pub fn players_label(&self) -> String {
        if !self.loading {
            format!("{}/{}", self.players, self.max_players)
        } else if self.last_updated.is_none() {
            "...".to_string()
        } else {
            "-".to_string()
        }
    }
}

mod ping_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(ping: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(ping.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn outcome(rules: Option<Rules>) -> ProbeOutcome {
        ProbeOutcome {
            status: ServerStatus {
                name: "Freeroam".to_string(),
                players: 12,
                max_players: 50,
                passworded: true,
                ping: Duration::from_millis(38),
            },
            rules,
            probed_at: Utc::now(),
        }
    }

    #[test]
    fn test_apply_outcome_keeps_rules_when_rules_probe_failed() {
        let mut record = ServerRecord::pending(&Endpoint::new("10.0.0.1", 7777));
        record.rules = Some(Rules::from([("version".to_string(), "omp 1.2".to_string())]));

        record.apply_outcome(&outcome(None));

        assert!(!record.loading);
        assert_eq!(record.players, 12);
        assert_eq!(record.ping_ms(), 38);
        assert!(record.last_updated.is_some());
        assert_eq!(record.rules.as_ref().unwrap()["version"], "omp 1.2");
    }

    #[test]
    fn test_apply_outcome_replaces_rules() {
        let mut record = ServerRecord::pending(&Endpoint::new("10.0.0.1", 7777));
        let rules = Rules::from([("weather".to_string(), "10".to_string())]);
        record.apply_outcome(&outcome(Some(rules)));
        assert_eq!(record.rules.unwrap().len(), 1);
    }

    #[test]
    fn test_updated_within() {
        let now = Utc::now();
        let mut record = ServerRecord::pending(&Endpoint::new("h", 1));
        assert!(!record.updated_within(now, Duration::from_secs(86_400)));

        record.last_updated = Some(now - ChronoDuration::hours(1));
        assert!(record.updated_within(now, Duration::from_secs(86_400)));

        record.last_updated = Some(now - ChronoDuration::hours(25));
        assert!(!record.updated_within(now, Duration::from_secs(86_400)));
    }

    #[test]
    fn test_labels() {
        let mut record = ServerRecord::pending(&Endpoint::new("h", 7777));
        assert_eq!(record.display_name(), "(unknown)");
        assert_eq!(record.ping_label(), "...");
        assert_eq!(record.players_label(), "...");

        record.apply_outcome(&outcome(None));
        assert_eq!(record.display_name(), "Freeroam [locked]");
        assert_eq!(record.ping_label(), "38 ms");
        assert_eq!(record.players_label(), "12/50");

        record.loading = true;
        assert_eq!(record.ping_label(), "-");
    }

    #[test]
    fn test_loading_is_never_persisted() {
        let record = ServerRecord::pending(&Endpoint::new("h", 7777));
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("loading"));

        let back: ServerRecord = serde_json::from_str(&json).unwrap();
        assert!(!back.loading);
        assert_eq!(back.endpoint(), Endpoint::new("h", 7777));
    }
}
