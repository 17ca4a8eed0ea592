// src/query/poller.rs
use log::debug;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};

use crate::models::server::{Endpoint, ProbeOutcome, Rules};
use crate::query::probe::{players_within, query_server, ProbeClient};

#[derive(Debug, Clone)]
pub struct PollPolicy {
    pub debounce: Duration,
    pub interval: Duration,
    pub probe_timeout: Duration,
    pub history_len: usize,
}

/// Result of one successful poll tick.
#[derive(Debug, Clone)]
pub struct PollReport {
    pub endpoint: Endpoint,
    pub outcome: ProbeOutcome,
    /// Empty when the player query failed.
    pub players: Vec<String>,
    /// Empty when the rules query failed.
    pub rules: Rules,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PingStats {
    pub latest: i64,
    pub average: i64,
    pub max: i64,
}

/// Bounded ping series in milliseconds, oldest evicted first.
#[derive(Debug, Clone)]
pub struct PingHistory {
    samples: VecDeque<i64>,
    capacity: usize,
}

impl PingHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { samples: VecDeque::with_capacity(capacity), capacity }
    }

    pub fn push(&mut self, ping_ms: i64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(ping_ms);
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> Vec<i64> {
        self.samples.iter().copied().collect()
    }

    pub fn stats(&self) -> PingStats {
        let Some(&latest) = self.samples.back() else {
            return PingStats::default();
        };
        let sum: i64 = self.samples.iter().sum();
        PingStats {
            latest,
            average: sum / self.samples.len() as i64,
            max: self.samples.iter().copied().max().unwrap_or(0),
        }
    }
}

/// Keeps at most one polling loop alive, targeting the highlighted server.
///
/// Every target change bumps `generation`; a loop only reports while the
/// generation it was started with is still current, and the owner re-checks
/// the token when a report arrives.
pub struct SelectionPoller {
    probe: Arc<dyn ProbeClient>,
    policy: PollPolicy,
    generation: Arc<AtomicU64>,
    current: Option<Endpoint>,
    task: Option<JoinHandle<()>>,
    history: PingHistory,
    history_owner: Option<Endpoint>,
}

impl SelectionPoller {
    pub fn new(probe: Arc<dyn ProbeClient>, policy: PollPolicy) -> Self {
        let history = PingHistory::new(policy.history_len);
        Self {
            probe,
            policy,
            generation: Arc::new(AtomicU64::new(0)),
            current: None,
            task: None,
            history,
            history_owner: None,
        }
    }

    pub fn current(&self) -> Option<&Endpoint> {
        self.current.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn is_polling(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    /// Arms a new loop for `endpoint`. Re-selecting the server already being
    /// polled is a no-op and returns false.
    pub fn select<F>(&mut self, endpoint: Endpoint, sink: F) -> bool
    where
        F: Fn(u64, PollReport) + Send + Sync + 'static,
    {
        if self.current.as_ref() == Some(&endpoint) && self.is_polling() {
            return false;
        }

        self.stop();
        if self.history_owner.as_ref() != Some(&endpoint) {
            self.history.clear();
            self.history_owner = Some(endpoint.clone());
        }

        let token = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Polling {} (generation {})", endpoint, token);
        self.current = Some(endpoint.clone());
        self.task = Some(tokio::spawn(poll_loop(
            Arc::clone(&self.probe),
            endpoint,
            self.policy.clone(),
            Arc::clone(&self.generation),
            token,
            sink,
        )));
        true
    }

    /// Stops the running loop and forgets the selection.
    pub fn cancel(&mut self) {
        self.stop();
        self.current = None;
    }

    fn stop(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Whether a report stamped with `token` may still be applied.
    pub fn accepts(&self, token: u64) -> bool {
        self.current.is_some() && token == self.generation()
    }

    pub fn record_ping(&mut self, ping_ms: i64) -> (Vec<i64>, PingStats) {
        self.history.push(ping_ms);
        (self.history.samples(), self.history.stats())
    }

    pub fn history(&self) -> &PingHistory {
        &self.history
    }
}

impl Drop for SelectionPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll_loop<F>(
    probe: Arc<dyn ProbeClient>,
    endpoint: Endpoint,
    policy: PollPolicy,
    generation: Arc<AtomicU64>,
    token: u64,
    sink: F,
) where
    F: Fn(u64, PollReport) + Send + Sync + 'static,
{
    let still_current = || generation.load(Ordering::SeqCst) == token;

    sleep(policy.debounce).await;
    if !still_current() {
        return;
    }

    let mut ticker = interval(policy.interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // The first tick completes immediately.
        ticker.tick().await;
        if !still_current() {
            return;
        }

        let Some(report) = poll_once(probe.as_ref(), &endpoint, policy.probe_timeout).await else {
            continue;
        };

        if !still_current() {
            return;
        }
        sink(token, report);
    }
}

/// One tick: status and rules, then the player list. A failed status query
/// abandons the tick.
async fn poll_once(
    probe: &dyn ProbeClient,
    endpoint: &Endpoint,
    limit: Duration,
) -> Option<PollReport> {
    let outcome = match query_server(probe, endpoint, limit).await {
        Ok(outcome) => outcome,
        Err(e) => {
            debug!("Poll of {} failed: {}", endpoint, e);
            return None;
        }
    };
    let players = players_within(probe, endpoint, limit).await.unwrap_or_default();
    let rules = outcome.rules.clone().unwrap_or_default();

    Some(PollReport { endpoint: endpoint.clone(), outcome, players, rules })
}
