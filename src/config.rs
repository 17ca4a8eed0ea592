use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::query::poller::PollPolicy;
use crate::query::pool::PoolPolicy;

pub const DEFAULT_DIRECTORY_URL: &str = "https://api.open.mp/servers";

#[derive(Debug, Clone)]
pub struct Config {
    // Directory source
    pub directory_url: String,
    pub fallback_path: PathBuf,
    pub fetch_timeout_ms: u64,
    pub max_directory_bytes: usize,

    // Result cache
    pub cache_path: PathBuf,
    pub cache_max_age_secs: u64,

    // Bulk refresh
    pub query_concurrency: usize,
    pub bulk_probe_timeout_ms: u64,
    pub single_probe_timeout_ms: u64,
    pub cycle_deadline_ms: u64,
    pub skip_if_updated_within_secs: u64,

    // Selection polling
    pub selection_debounce_ms: u64,
    pub poll_interval_ms: u64,
    pub ping_history_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            directory_url: DEFAULT_DIRECTORY_URL.to_string(),
            fallback_path: default_fallback_path(),
            fetch_timeout_ms: 5000,
            max_directory_bytes: 50 * 1024 * 1024,
            cache_path: default_cache_path(),
            cache_max_age_secs: 3600, // 1 hour
            query_concurrency: 64,
            bulk_probe_timeout_ms: 3000,
            single_probe_timeout_ms: 1500,
            cycle_deadline_ms: 10_000,
            skip_if_updated_within_secs: 24 * 3600,
            selection_debounce_ms: 500,
            poll_interval_ms: 1000,
            ping_history_len: 50,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            directory_url: env::var("DIRECTORY_URL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.directory_url),

            fallback_path: env::var("FALLBACK_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.fallback_path),

            fetch_timeout_ms: env_or("FETCH_TIMEOUT_MS", defaults.fetch_timeout_ms),
            max_directory_bytes: env_or("MAX_DIRECTORY_BYTES", defaults.max_directory_bytes),

            cache_path: env::var("CACHE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_path),

            cache_max_age_secs: env_or("CACHE_MAX_AGE_SECS", defaults.cache_max_age_secs),
            query_concurrency: env_or("QUERY_CONCURRENCY", defaults.query_concurrency).max(1),
            bulk_probe_timeout_ms: env_or("BULK_PROBE_TIMEOUT_MS", defaults.bulk_probe_timeout_ms),
            single_probe_timeout_ms: env_or(
                "SINGLE_PROBE_TIMEOUT_MS",
                defaults.single_probe_timeout_ms,
            ),
            cycle_deadline_ms: env_or("CYCLE_DEADLINE_MS", defaults.cycle_deadline_ms),
            skip_if_updated_within_secs: env_or(
                "SKIP_IF_UPDATED_WITHIN_SECS",
                defaults.skip_if_updated_within_secs,
            ),
            selection_debounce_ms: env_or("SELECTION_DEBOUNCE_MS", defaults.selection_debounce_ms),
            poll_interval_ms: env_or("POLL_INTERVAL_MS", defaults.poll_interval_ms),
            ping_history_len: env_or("PING_HISTORY_LEN", defaults.ping_history_len).max(1),
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn cache_max_age(&self) -> Duration {
        Duration::from_secs(self.cache_max_age_secs)
    }

    pub fn single_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.single_probe_timeout_ms)
    }

    pub fn pool_policy(&self) -> PoolPolicy {
        PoolPolicy {
            concurrency: self.query_concurrency.max(1),
            probe_timeout: Duration::from_millis(self.bulk_probe_timeout_ms),
            cycle_deadline: Duration::from_millis(self.cycle_deadline_ms),
            skip_if_updated_within: Duration::from_secs(self.skip_if_updated_within_secs),
        }
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            debounce: Duration::from_millis(self.selection_debounce_ms),
            interval: Duration::from_millis(self.poll_interval_ms),
            probe_timeout: self.single_probe_timeout(),
            history_len: self.ping_history_len.max(1),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// `servers.json` next to the executable.
pub fn default_fallback_path() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("servers.json")))
        .unwrap_or_else(|| PathBuf::from("servers.json"))
}

pub fn default_cache_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("omp-tui").join("servers_cache.json"))
        .unwrap_or_else(|| PathBuf::from("servers_cache.json"))
}
