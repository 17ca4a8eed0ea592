// src/view.rs
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::models::server::ServerRecord;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortMode {
    /// Directory order.
    #[default]
    None,
    /// Ascending ping, unknown ping last.
    Ping,
    /// Descending player count.
    Players,
}

impl SortMode {
    pub fn next(self) -> Self {
        match self {
            Self::None => Self::Ping,
            Self::Ping => Self::Players,
            Self::Players => Self::None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Ping => "ping",
            Self::Players => "players",
        }
    }
}

impl FromStr for SortMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Self::None),
            "ping" => Ok(Self::Ping),
            "players" => Ok(Self::Players),
            other => Err(format!("unknown sort mode '{}'", other)),
        }
    }
}

/// Server version tag read from the `version` rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VersionTag {
    Samp037,
    Samp03DL,
    OpenMp,
}

impl VersionTag {
    pub const ALL: [VersionTag; 3] = [Self::Samp037, Self::Samp03DL, Self::OpenMp];

    pub fn label(self) -> &'static str {
        match self {
            Self::Samp037 => "0.3.7",
            Self::Samp03DL => "0.3.DL",
            Self::OpenMp => "open.mp",
        }
    }

    /// Substring looked for inside the `version` rule.
    fn marker(self) -> &'static str {
        match self {
            Self::OpenMp => "omp",
            other => other.label(),
        }
    }

    pub fn matches(self, version: &str) -> bool {
        version.contains(self.marker())
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for VersionTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        VersionTag::ALL
            .into_iter()
            .find(|tag| tag.label().eq_ignore_ascii_case(wanted) || tag.marker() == wanted)
            .ok_or_else(|| format!("unknown version '{}'", wanted))
    }
}

/// Everything that decides which rows are visible and in what order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewQuery {
    pub search: String,
    pub versions: BTreeSet<VersionTag>,
    pub sort: SortMode,
}

impl ViewQuery {
    /// Flips `tag`; returns whether it is now enabled.
    pub fn toggle(&mut self, tag: VersionTag) -> bool {
        if self.versions.remove(&tag) {
            false
        } else {
            self.versions.insert(tag);
            true
        }
    }

    pub fn matches(&self, record: &ServerRecord) -> bool {
        matches_search(record, &self.search.trim().to_lowercase()) && self.matches_version(record)
    }

    fn matches_version(&self, record: &ServerRecord) -> bool {
        if self.versions.is_empty() {
            return true;
        }
        let Some(version) = record.rules.as_ref().and_then(|rules| rules.get("version")) else {
            return false;
        };
        self.versions.iter().any(|tag| tag.matches(version))
    }

    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if !self.search.is_empty() {
            parts.push(format!("Search: \"{}\"", self.search));
        }
        if !self.versions.is_empty() {
            let tags: Vec<&str> = self.versions.iter().map(|tag| tag.label()).collect();
            parts.push(format!("Version: {}", tags.join(", ")));
        }

        if parts.is_empty() {
            "No filters active".to_string()
        } else {
            format!("Filters: {}", parts.join(" | "))
        }
    }
}

fn matches_search(record: &ServerRecord, needle: &str) -> bool {
    needle.is_empty()
        || record.name.to_lowercase().contains(needle)
        || record.address().to_lowercase().contains(needle)
}

/// Filters `base` and sorts the survivors. Pure; ties keep input order.
pub fn apply(base: &[ServerRecord], query: &ViewQuery) -> Vec<ServerRecord> {
    let mut visible: Vec<ServerRecord> =
        base.iter().filter(|record| query.matches(record)).cloned().collect();
    sort_records(&mut visible, query.sort);
    visible
}

pub fn sort_records(records: &mut [ServerRecord], mode: SortMode) {
    match mode {
        SortMode::None => {}
        SortMode::Ping => records.sort_by(|a, b| compare_ping(a, b)),
        SortMode::Players => records.sort_by(|a, b| b.players.cmp(&a.players)),
    }
}

fn compare_ping(a: &ServerRecord, b: &ServerRecord) -> Ordering {
    match (a.ping.is_zero(), b.ping.is_zero()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.ping.cmp(&b.ping),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::server::{Endpoint, Rules};
    use std::time::Duration;

    fn server(name: &str, host: &str, ping_ms: u64, players: u32) -> ServerRecord {
        let mut record = ServerRecord::pending(&Endpoint::new(host, 7777));
        record.name = name.to_string();
        record.ping = Duration::from_millis(ping_ms);
        record.players = players;
        record
    }

    fn with_version(mut record: ServerRecord, version: &str) -> ServerRecord {
        record.rules = Some(Rules::from([("version".to_string(), version.to_string())]));
        record
    }

    fn names(records: &[ServerRecord]) -> Vec<&str> {
        records.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn test_ping_sort_puts_unknown_last_and_is_stable() {
        let base = vec![
            server("zero-a", "1.1.1.1", 0, 0),
            server("five", "1.1.1.2", 5, 0),
            server("zero-b", "1.1.1.3", 0, 0),
            server("three", "1.1.1.4", 3, 0),
        ];
        let query = ViewQuery { sort: SortMode::Ping, ..Default::default() };
        assert_eq!(names(&apply(&base, &query)), vec!["three", "five", "zero-a", "zero-b"]);
    }

    #[test]
    fn test_players_sort_descending_and_stable() {
        let base = vec![
            server("a", "1.1.1.1", 0, 10),
            server("b", "1.1.1.2", 0, 50),
            server("c", "1.1.1.3", 0, 10),
        ];
        let query = ViewQuery { sort: SortMode::Players, ..Default::default() };
        assert_eq!(names(&apply(&base, &query)), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_no_sort_keeps_fetch_order() {
        let base = vec![server("b", "1.1.1.2", 9, 1), server("a", "1.1.1.1", 1, 9)];
        assert_eq!(names(&apply(&base, &ViewQuery::default())), vec!["b", "a"]);
    }

    #[test]
    fn test_search_matches_name_or_address_case_insensitively() {
        let base = vec![
            server("Los Santos RP", "10.0.0.1", 0, 0),
            server("Drift", "192.168.1.5", 0, 0),
        ];
        let mut query = ViewQuery { search: "  SANTOS ".to_string(), ..Default::default() };
        assert_eq!(names(&apply(&base, &query)), vec!["Los Santos RP"]);

        query.search = "192.168.1.5:7777".to_string();
        assert_eq!(names(&apply(&base, &query)), vec!["Drift"]);

        query.search.clear();
        assert_eq!(apply(&base, &query).len(), 2);
    }

    #[test]
    fn test_version_filter() {
        let base = vec![
            with_version(server("legacy", "1.1.1.1", 0, 0), "0.3.7-R2"),
            with_version(server("omp", "1.1.1.2", 0, 0), "omp 1.2.0.2670"),
            server("no-rules", "1.1.1.3", 0, 0),
            with_version(server("dl", "1.1.1.4", 0, 0), "0.3.DL-R1"),
        ];
        let mut query = ViewQuery::default();
        assert_eq!(apply(&base, &query).len(), 4);

        assert!(query.toggle(VersionTag::OpenMp));
        assert_eq!(names(&apply(&base, &query)), vec!["omp"]);

        query.toggle(VersionTag::Samp037);
        assert_eq!(names(&apply(&base, &query)), vec!["legacy", "omp"]);

        assert!(!query.toggle(VersionTag::OpenMp));
        assert!(!query.toggle(VersionTag::Samp037));
        assert_eq!(apply(&base, &query).len(), 4);
    }

    #[test]
    fn test_sort_mode_cycles() {
        assert_eq!(SortMode::None.next(), SortMode::Ping);
        assert_eq!(SortMode::Ping.next(), SortMode::Players);
        assert_eq!(SortMode::Players.next(), SortMode::None);
        assert_eq!("PING".parse::<SortMode>(), Ok(SortMode::Ping));
        assert!("fastest".parse::<SortMode>().is_err());
    }

    #[test]
    fn test_version_tag_parse() {
        assert_eq!("open.mp".parse::<VersionTag>(), Ok(VersionTag::OpenMp));
        assert_eq!("omp".parse::<VersionTag>(), Ok(VersionTag::OpenMp));
        assert_eq!("0.3.dl".parse::<VersionTag>(), Ok(VersionTag::Samp03DL));
        assert!("0.2x".parse::<VersionTag>().is_err());
    }

    #[test]
    fn test_summary() {
        let mut query = ViewQuery::default();
        assert_eq!(query.summary(), "No filters active");
        query.search = "drift".to_string();
        query.toggle(VersionTag::OpenMp);
        query.toggle(VersionTag::Samp037);
        assert_eq!(query.summary(), "Filters: Search: \"drift\" | Version: 0.3.7, open.mp");
    }
}
