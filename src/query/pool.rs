// src/query/pool.rs
use chrono::Utc;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::models::server::{Endpoint, ProbeOutcome, ServerRecord};
use crate::query::probe::{query_server, ProbeClient};

#[derive(Debug, Clone)]
pub struct PoolPolicy {
    pub concurrency: usize,
    pub probe_timeout: Duration,
    pub cycle_deadline: Duration,
    /// Records probed more recently than this are skipped unless forced.
    pub skip_if_updated_within: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolProgress {
    /// Records whose probe finished, successfully or not.
    pub completed: usize,
    /// Subset of `completed` whose status probe answered.
    pub updated: usize,
    pub skipped: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolSummary {
    pub completed: usize,
    pub updated: usize,
    pub skipped: usize,
    pub total: usize,
    /// Records never finished because the cycle deadline passed.
    pub abandoned: usize,
}

#[derive(Debug, Clone)]
pub enum PoolEvent {
    Probed { endpoint: Endpoint, outcome: ProbeOutcome },
    Skipped { endpoint: Endpoint },
    Progress(PoolProgress),
}

/// Fans a snapshot out to a fixed set of workers. Results are handed to the
/// caller's sink; the pool itself never touches the authoritative snapshot.
pub struct QueryPool {
    probe: Arc<dyn ProbeClient>,
    policy: PoolPolicy,
}

struct Cycle {
    jobs: Vec<ServerRecord>,
    next: AtomicUsize,
    progress: Mutex<PoolProgress>,
    /// Cleared at the barrier; nothing is emitted afterwards.
    open: AtomicBool,
}

impl QueryPool {
    pub fn new(probe: Arc<dyn ProbeClient>, policy: PoolPolicy) -> Self {
        Self { probe, policy }
    }

    pub async fn run<F>(
        &self,
        records: Vec<ServerRecord>,
        force_refresh: bool,
        sink: F,
    ) -> PoolSummary
    where
        F: Fn(PoolEvent) + Send + Sync + 'static,
    {
        let total = records.len();
        let deadline = Instant::now() + self.policy.cycle_deadline;
        let cycle = Arc::new(Cycle {
            jobs: records,
            next: AtomicUsize::new(0),
            progress: Mutex::new(PoolProgress { total, ..Default::default() }),
            open: AtomicBool::new(true),
        });
        let sink = Arc::new(sink);
        let workers = self.policy.concurrency.max(1).min(total.max(1));
        let checked_at = Utc::now();

        info!("Querying {} servers with {} workers", total, workers);

        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let cycle = Arc::clone(&cycle);
            let sink = Arc::clone(&sink);
            let probe = Arc::clone(&self.probe);
            let policy = self.policy.clone();

            handles.push(tokio::spawn(async move {
                let emit = |event: PoolEvent| {
                    if cycle.open.load(Ordering::SeqCst) {
                        sink(event);
                    }
                };

                loop {
                    if Instant::now() >= deadline {
                        break;
                    }
                    let idx = cycle.next.fetch_add(1, Ordering::SeqCst);
                    let Some(record) = cycle.jobs.get(idx) else {
                        break;
                    };
                    let endpoint = record.endpoint();

                    let fresh = record.updated_within(checked_at, policy.skip_if_updated_within);
                    if !force_refresh && fresh {
                        emit(PoolEvent::Skipped { endpoint });
                        let mut progress = cycle.progress.lock();
                        progress.skipped += 1;
                        emit(PoolEvent::Progress(*progress));
                        continue;
                    }

                    let result =
                        query_server(probe.as_ref(), &endpoint, policy.probe_timeout).await;
                    let succeeded = match result {
                        Ok(outcome) => {
                            emit(PoolEvent::Probed { endpoint, outcome });
                            true
                        }
                        Err(e) => {
                            debug!("Query for {} failed: {}", endpoint, e);
                            false
                        }
                    };

                    let mut progress = cycle.progress.lock();
                    progress.completed += 1;
                    if succeeded {
                        progress.updated += 1;
                    }
                    emit(PoolEvent::Progress(*progress));
                }
            }));
        }

        // Workers still running at the deadline are left to finish their
        // current probe on their own; their results are dropped.
        let barrier = async {
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!("Query worker ended abnormally: {}", e);
                }
            }
        };
        let timed_out = tokio::time::timeout_at(deadline, barrier).await.is_err();
        cycle.open.store(false, Ordering::SeqCst);

        let progress = *cycle.progress.lock();
        let summary = PoolSummary {
            completed: progress.completed,
            updated: progress.updated,
            skipped: progress.skipped,
            total,
            abandoned: total - progress.completed - progress.skipped,
        };

        if timed_out {
            warn!("Query cycle hit its deadline with {} servers outstanding", summary.abandoned);
        }
        info!(
            "Query cycle done: {} skipped, {} updated, {} failed, {} abandoned",
            summary.skipped,
            summary.updated,
            summary.completed - summary.updated,
            summary.abandoned
        );
        summary
    }
}
