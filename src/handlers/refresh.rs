// src/handlers/refresh.rs
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::directory::DirectorySource;
use crate::engine::{Completion, EngineState, ViewEvent};
use crate::handlers::view::{publish, recompute, update_row};
use crate::models::server::{Endpoint, ProbeOutcome, ServerRecord};
use crate::query::pool::{PoolEvent, PoolSummary, QueryPool};
use crate::query::probe::query_server;
use crate::storage::memory::ServerStorage;
use crate::utils::BrowserError;

pub(crate) fn start(state: &mut EngineState, force: bool) {
    if state.refresh.running {
        info!("Refresh requested while a cycle is running, ignoring");
        state.status(BrowserError::Busy.to_string());
        return;
    }

    state.refresh.running = true;
    state.refresh.last_cycle += 1;
    let cycle = state.refresh.last_cycle;
    state.refresh.active = Some(cycle);
    state.status("Refreshing servers...");
    publish(state);

    let fetcher = Arc::clone(&state.fetcher);
    let url = state.config.directory_url.clone();
    let fallback = state.config.fallback_path.clone();
    let completions = state.completions();
    tokio::spawn(async move {
        let result = fetcher.fetch_with_fallback(&url, &fallback).await;
        let _ = completions.send(Completion::DirectoryFetched { cycle, force, result });
    });
}

pub(crate) fn directory_fetched(
    state: &mut EngineState,
    cycle: u64,
    force: bool,
    result: Result<(Vec<ServerRecord>, DirectorySource), BrowserError>,
) {
    if state.refresh.active != Some(cycle) {
        return;
    }

    let (servers, source) = match result {
        Ok(fetched) => fetched,
        Err(e) => {
            error!("Failed to load server list: {}", e);
            state.refresh.running = false;
            state.refresh.active = None;
            publish(state);
            state.status(format!("Server list error: {}", e));
            state.emit(ViewEvent::CycleError(e.to_string()));
            return;
        }
    };

    state.storage.replace_with_merge(servers);
    let total = state.storage.len();
    match source {
        DirectorySource::Remote => state.status(format!("Loaded {} servers", total)),
        DirectorySource::Fallback => {
            state.status(format!("Loaded {} servers from local list", total))
        }
    }
    recompute(state);

    let pool = QueryPool::new(Arc::clone(&state.probe), state.config.pool_policy());
    let records = state.storage.records().to_vec();
    let completions = state.completions();
    tokio::spawn(async move {
        let sink = completions.clone();
        let summary = pool
            .run(records, force, move |event| {
                let _ = sink.send(Completion::Pool { cycle, event });
            })
            .await;
        let _ = completions.send(Completion::PoolFinished { cycle, summary });
    });
}

pub(crate) fn pool_event(state: &mut EngineState, cycle: u64, event: PoolEvent) {
    if state.refresh.active != Some(cycle) {
        debug!("Dropping result from finished cycle {}", cycle);
        return;
    }

    match event {
        PoolEvent::Probed { endpoint, outcome } => {
            if state.storage.apply_outcome(&endpoint, &outcome).is_some() {
                update_row(state, &endpoint);
            }
        }
        PoolEvent::Skipped { endpoint } => {
            if state.storage.mark_loaded(&endpoint).is_some() {
                update_row(state, &endpoint);
            }
        }
        PoolEvent::Progress(progress) => state.status(format!(
            "Loaded from cache: {}, Updated: {} of {} servers",
            progress.skipped, progress.updated, progress.total
        )),
    }
}

/// The barrier has passed: the busy flag clears and the snapshot is persisted
/// exactly once for the cycle.
pub(crate) fn pool_finished(state: &mut EngineState, cycle: u64, summary: PoolSummary) {
    if state.refresh.active != Some(cycle) {
        return;
    }
    state.refresh.active = None;
    state.refresh.running = false;
    recompute(state);

    state.status(format!(
        "Loaded from cache: {}, Updated: {} servers",
        summary.skipped, summary.updated
    ));
    state.emit(ViewEvent::RefreshFinished(summary));
    save_cache(state);
}

/// One writer at a time. A save requested while another is in flight runs
/// after it, with the snapshot as it is then.
fn save_cache(state: &mut EngineState) {
    if state.refresh.saving {
        debug!("Cache save in flight, queueing another");
        state.refresh.save_pending = true;
        return;
    }
    state.refresh.saving = true;

    let cache = state.cache.clone();
    let records = state.storage.records().to_vec();
    let completions = state.completions();
    tokio::task::spawn_blocking(move || {
        let result = cache.save(&records).map(|_| records.len());
        let _ = completions.send(Completion::CacheSaved(result));
    });
}

pub(crate) fn cache_saved(state: &mut EngineState, result: Result<usize, BrowserError>) {
    state.refresh.saving = false;
    if std::mem::take(&mut state.refresh.save_pending) {
        save_cache(state);
    }

    match result {
        Ok(count) => {
            info!("Saved {} servers to {}", count, state.cache.path().display());
            state.emit(ViewEvent::CacheSaved(count));
        }
        Err(e) => {
            warn!("Failed to save cache: {}", e);
            state.status(format!("Failed to save cache: {}", e));
        }
    }
}

/// Seeds an empty snapshot from disk. A directory fetched in the meantime wins.
pub(crate) fn cache_restored(state: &mut EngineState, records: Option<Vec<ServerRecord>>) {
    let Some(records) = records else {
        debug!("No usable cache at {}", state.cache.path().display());
        return;
    };
    if !state.storage.is_empty() {
        debug!("Snapshot already populated, ignoring cache");
        return;
    }

    let count = records.len();
    info!("Loaded {} servers from cache", count);
    state.storage = ServerStorage::from_records(records);
    recompute(state);
    state.status(format!("Loaded {} servers from cache", count));
}

/// Adds the typed address to the snapshot when unknown and probes it once.
pub(crate) fn query_address(
    state: &mut EngineState,
    input: &str,
    reply: oneshot::Sender<Result<Endpoint, BrowserError>>,
) {
    let endpoint = match Endpoint::parse(input) {
        Ok(endpoint) => endpoint,
        Err(e) => {
            debug!("Rejected address {:?}: {}", input, e);
            let _ = reply.send(Err(e));
            return;
        }
    };

    if state.storage.insert_if_absent(ServerRecord::pending(&endpoint)) {
        info!("Added {} to the server list", endpoint);
        recompute(state);
    }
    state.status(format!("Querying {}...", endpoint));

    let probe = Arc::clone(&state.probe);
    let limit = state.config.single_probe_timeout();
    let completions = state.completions();
    let target = endpoint.clone();
    tokio::spawn(async move {
        let result = query_server(probe.as_ref(), &target, limit).await;
        let _ = completions.send(Completion::SingleQuery { endpoint: target, result });
    });

    let _ = reply.send(Ok(endpoint));
}

pub(crate) fn single_query(
    state: &mut EngineState,
    endpoint: Endpoint,
    result: Result<ProbeOutcome, BrowserError>,
) {
    match result {
        Ok(outcome) => {
            if state.storage.apply_outcome(&endpoint, &outcome).is_some() {
                update_row(state, &endpoint);
                state.status(format!("Updated {}", endpoint));
            }
        }
        Err(e) => {
            // The record keeps whatever it had, including its loading state.
            warn!("Query for {} failed: {}", endpoint, e);
            state.status(format!("Query for {} failed: {}", endpoint, e));
        }
    }
}
