// src/engine.rs
use log::{debug, info};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;

use crate::config::Config;
use crate::directory::{DirectoryFetcher, DirectorySource};
use crate::handlers;
use crate::models::server::{Endpoint, ProbeOutcome, ServerRecord};
use crate::query::poller::{PingStats, PollReport, SelectionPoller};
use crate::query::pool::{PoolEvent, PoolSummary};
use crate::query::probe::ProbeClient;
use crate::storage::cache::ResultCache;
use crate::storage::memory::ServerStorage;
use crate::utils::BrowserError;
use crate::view::{ViewQuery, VersionTag};

/// Everything the presentation layer is told about.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewEvent {
    /// The visible list was recomputed from scratch.
    Table(Vec<ServerRecord>),
    /// One visible row changed in place.
    Row { index: usize, record: ServerRecord },
    Status(String),
    FilterSummary(String),
    PingHistory { samples: Vec<i64>, stats: PingStats },
    Players { names: Vec<String>, count: u32 },
    Rules(BTreeMap<String, String>),
    RefreshFinished(PoolSummary),
    CacheSaved(usize),
    CycleError(String),
}

/// Latest state published by the engine for synchronous readers.
#[derive(Debug, Clone, Default)]
pub struct ViewSnapshot {
    pub records: Vec<ServerRecord>,
    pub visible: Vec<ServerRecord>,
    pub query: ViewQuery,
    pub selected: Option<Endpoint>,
    pub refreshing: bool,
}

pub(crate) enum Command {
    Refresh { force: bool },
    Select(usize),
    ClearSelection,
    SetSearch(String),
    ToggleFilter(VersionTag),
    CycleSort,
    QueryAddress { input: String, reply: oneshot::Sender<Result<Endpoint, BrowserError>> },
    Shutdown,
}

/// Results posted back by tasks the engine spawned.
pub(crate) enum Completion {
    CacheRestored(Option<Vec<ServerRecord>>),
    DirectoryFetched {
        cycle: u64,
        force: bool,
        result: Result<(Vec<ServerRecord>, DirectorySource), BrowserError>,
    },
    Pool { cycle: u64, event: PoolEvent },
    PoolFinished { cycle: u64, summary: PoolSummary },
    CacheSaved(Result<usize, BrowserError>),
    Poll { token: u64, report: PollReport },
    SingleQuery { endpoint: Endpoint, result: Result<ProbeOutcome, BrowserError> },
}

#[derive(Debug, Default)]
pub(crate) struct RefreshState {
    pub(crate) running: bool,
    pub(crate) last_cycle: u64,
    /// Cycle whose pool results are currently accepted.
    pub(crate) active: Option<u64>,
    /// A cache write is running on the blocking pool.
    pub(crate) saving: bool,
    pub(crate) save_pending: bool,
}

/// Sole owner of the snapshot, selection and filters. Runs on one task; every
/// mutation and every view event happens there.
pub(crate) struct EngineState {
    pub(crate) config: Config,
    pub(crate) probe: Arc<dyn ProbeClient>,
    pub(crate) fetcher: Arc<DirectoryFetcher>,
    pub(crate) cache: ResultCache,
    pub(crate) storage: ServerStorage,
    pub(crate) visible: Vec<ServerRecord>,
    pub(crate) query: ViewQuery,
    pub(crate) selection: SelectionPoller,
    pub(crate) refresh: RefreshState,
    completions: UnboundedSender<Completion>,
    events: UnboundedSender<ViewEvent>,
    pub(crate) published: Arc<RwLock<ViewSnapshot>>,
}

impl EngineState {
    pub(crate) fn emit(&self, event: ViewEvent) {
        // The view may have gone away; the engine keeps running regardless.
        let _ = self.events.send(event);
    }

    pub(crate) fn status(&self, text: impl Into<String>) {
        self.emit(ViewEvent::Status(text.into()));
    }

    pub(crate) fn completions(&self) -> UnboundedSender<Completion> {
        self.completions.clone()
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Refresh { force } => handlers::refresh::start(self, force),
            Command::Select(index) => handlers::selection::select(self, index),
            Command::ClearSelection => handlers::selection::clear(self),
            Command::SetSearch(text) => handlers::view::set_search(self, text),
            Command::ToggleFilter(tag) => handlers::view::toggle_filter(self, tag),
            Command::CycleSort => handlers::view::cycle_sort(self),
            Command::QueryAddress { input, reply } => {
                handlers::refresh::query_address(self, &input, reply)
            }
            Command::Shutdown => {}
        }
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::CacheRestored(records) => handlers::refresh::cache_restored(self, records),
            Completion::DirectoryFetched { cycle, force, result } => {
                handlers::refresh::directory_fetched(self, cycle, force, result)
            }
            Completion::Pool { cycle, event } => handlers::refresh::pool_event(self, cycle, event),
            Completion::PoolFinished { cycle, summary } => {
                handlers::refresh::pool_finished(self, cycle, summary)
            }
            Completion::CacheSaved(result) => handlers::refresh::cache_saved(self, result),
            Completion::Poll { token, report } => {
                handlers::selection::poll_report(self, token, report)
            }
            Completion::SingleQuery { endpoint, result } => {
                handlers::refresh::single_query(self, endpoint, result)
            }
        }
    }
}

pub struct Engine;

impl Engine {
    /// Starts the engine on the current tokio runtime. The cached directory is
    /// restored in the background; nothing is fetched until `refresh`.
    pub fn spawn(
        config: Config,
        probe: Arc<dyn ProbeClient>,
    ) -> (EngineHandle, UnboundedReceiver<ViewEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let published = Arc::new(RwLock::new(ViewSnapshot::default()));

        let state = EngineState {
            fetcher: Arc::new(DirectoryFetcher::new(
                config.fetch_timeout(),
                config.max_directory_bytes,
            )),
            cache: ResultCache::new(config.cache_path.clone(), config.cache_max_age()),
            selection: SelectionPoller::new(Arc::clone(&probe), config.poll_policy()),
            storage: ServerStorage::new(),
            visible: Vec::new(),
            query: ViewQuery::default(),
            refresh: RefreshState::default(),
            completions: completion_tx,
            events: event_tx,
            published: Arc::clone(&published),
            probe,
            config,
        };

        let cache = state.cache.clone();
        let restored = state.completions();
        tokio::task::spawn_blocking(move || {
            let _ = restored.send(Completion::CacheRestored(cache.load()));
        });

        tokio::spawn(run(state, command_rx, completion_rx));

        let handle = EngineHandle { commands: command_tx, published };
        (handle, event_rx)
    }
}

async fn run(
    mut state: EngineState,
    mut commands: UnboundedReceiver<Command>,
    mut completions: UnboundedReceiver<Completion>,
) {
    info!("Engine started");
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Shutdown) | None => break,
                Some(command) => state.handle_command(command),
            },
            Some(completion) = completions.recv() => state.handle_completion(completion),
        }
    }

    // Outstanding workers find their channel closed; nothing they send lands.
    state.selection.cancel();
    state.refresh.active = None;
    debug!("Engine stopped with {} servers", state.storage.len());
}

/// Cloneable front door to a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    commands: UnboundedSender<Command>,
    published: Arc<RwLock<ViewSnapshot>>,
}

impl EngineHandle {
    fn send(&self, command: Command) -> Result<(), BrowserError> {
        self.commands.send(command).map_err(|_| BrowserError::EngineClosed)
    }

    /// Fetch the directory and probe it. Ignored (with a status message) while
    /// a cycle is already running.
    pub fn refresh(&self, force: bool) -> Result<(), BrowserError> {
        self.send(Command::Refresh { force })
    }

    /// Highlight row `index` of the visible list.
    pub fn select(&self, index: usize) -> Result<(), BrowserError> {
        self.send(Command::Select(index))
    }

    pub fn clear_selection(&self) -> Result<(), BrowserError> {
        self.send(Command::ClearSelection)
    }

    pub fn set_search(&self, text: impl Into<String>) -> Result<(), BrowserError> {
        self.send(Command::SetSearch(text.into()))
    }

    pub fn toggle_filter(&self, tag: VersionTag) -> Result<(), BrowserError> {
        self.send(Command::ToggleFilter(tag))
    }

    pub fn cycle_sort(&self) -> Result<(), BrowserError> {
        self.send(Command::CycleSort)
    }

    /// Adds `input` to the directory if needed and queries it once. Resolves
    /// as soon as the address is accepted; the result arrives as a row update.
    pub async fn query_address(&self, input: &str) -> Result<Endpoint, BrowserError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::QueryAddress { input: input.to_string(), reply })?;
        response.await.map_err(|_| BrowserError::EngineClosed)?
    }

    pub fn view(&self) -> ViewSnapshot {
        self.published.read().clone()
    }

    pub fn shutdown(&self) -> Result<(), BrowserError> {
        self.send(Command::Shutdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::server::ServerStatus;
    use crate::query::pool::PoolProgress;
    use crate::query::probe::testing::ScriptedProbe;
    use chrono::Utc;

    fn state() -> (EngineState, UnboundedReceiver<ViewEvent>) {
        let (state, events, _) = state_with(Config::default());
        (state, events)
    }

    fn state_with(
        config: Config,
    ) -> (EngineState, UnboundedReceiver<ViewEvent>, UnboundedReceiver<Completion>) {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let probe: Arc<dyn ProbeClient> = Arc::new(ScriptedProbe::new());
        let seeded = ServerRecord::pending(&Endpoint::new("10.0.0.1", 7777));
        let state = EngineState {
            fetcher: Arc::new(DirectoryFetcher::new(
                config.fetch_timeout(),
                config.max_directory_bytes,
            )),
            cache: ResultCache::new(config.cache_path.clone(), config.cache_max_age()),
            selection: SelectionPoller::new(Arc::clone(&probe), config.poll_policy()),
            storage: ServerStorage::from_records(vec![seeded]),
            visible: Vec::new(),
            query: ViewQuery::default(),
            refresh: RefreshState::default(),
            completions: completion_tx,
            events: event_tx,
            published: Arc::new(RwLock::new(ViewSnapshot::default())),
            probe,
            config,
        };
        (state, event_rx, completion_rx)
    }

    fn outcome(ping_ms: u64) -> ProbeOutcome {
        ProbeOutcome {
            status: ServerStatus {
                name: "Alpha".to_string(),
                players: 1,
                max_players: 10,
                passworded: false,
                ping: std::time::Duration::from_millis(ping_ms),
            },
            rules: None,
            probed_at: Utc::now(),
        }
    }

    fn drain(events: &mut UnboundedReceiver<ViewEvent>) -> Vec<ViewEvent> {
        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        seen
    }

    #[tokio::test]
    async fn test_results_from_an_old_cycle_are_dropped() {
        let (mut state, mut events) = state();
        handlers::view::recompute(&mut state);
        drain(&mut events);
        let endpoint = Endpoint::new("10.0.0.1", 7777);
        state.refresh.active = Some(2);

        let probed = PoolEvent::Probed { endpoint: endpoint.clone(), outcome: outcome(30) };
        handlers::refresh::pool_event(&mut state, 1, probed.clone());
        handlers::refresh::pool_event(&mut state, 1, PoolEvent::Progress(PoolProgress::default()));
        assert!(drain(&mut events).is_empty());
        assert!(state.storage.get(&endpoint).unwrap().last_updated.is_none());

        handlers::refresh::pool_event(&mut state, 2, probed);
        let seen = drain(&mut events);
        assert!(matches!(
            &seen[..],
            [ViewEvent::Row { index: 0, record }] if record.ping_ms() == 30
        ));
        assert_eq!(state.published.read().records[0].ping_ms(), 30);
    }

    #[tokio::test]
    async fn test_refresh_while_running_is_rejected() {
        let (mut state, mut events) = state();
        state.refresh.running = true;
        state.refresh.last_cycle = 4;

        handlers::refresh::start(&mut state, true);

        assert_eq!(state.refresh.last_cycle, 4);
        let busy = ViewEvent::Status("Refresh already in progress".to_string());
        assert_eq!(drain(&mut events), vec![busy]);
    }

    #[tokio::test]
    async fn test_poll_report_without_selection_is_ignored() {
        let (mut state, mut events) = state();
        let endpoint = Endpoint::new("10.0.0.1", 7777);
        let report = PollReport {
            endpoint: endpoint.clone(),
            outcome: outcome(12),
            players: Vec::new(),
            rules: Default::default(),
        };

        let token = state.selection.generation();
        handlers::selection::poll_report(&mut state, token, report);

        assert!(drain(&mut events).is_empty());
        assert!(state.storage.get(&endpoint).unwrap().loading);
    }

    #[tokio::test]
    async fn test_out_of_range_selection_clears() {
        let (mut state, _events) = state();
        handlers::view::recompute(&mut state);
        handlers::selection::select(&mut state, 0);
        assert_eq!(state.published.read().selected, Some(Endpoint::new("10.0.0.1", 7777)));

        handlers::selection::select(&mut state, 5);
        assert!(state.selection.current().is_none());
        assert_eq!(state.published.read().selected, None);
    }

    async fn next_save(
        completions: &mut UnboundedReceiver<Completion>,
    ) -> Result<usize, BrowserError> {
        let wait = std::time::Duration::from_secs(5);
        let completion = tokio::time::timeout(wait, completions.recv())
            .await
            .unwrap()
            .unwrap();
        match completion {
            Completion::CacheSaved(result) => result,
            _ => panic!("expected a cache save"),
        }
    }

    #[tokio::test]
    async fn test_cycle_finishing_during_a_save_queues_one_more() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            cache_path: dir.path().join("servers_cache.json"),
            ..Config::default()
        };
        let (mut state, mut events, mut completions) = state_with(config);

        state.refresh.active = Some(1);
        handlers::refresh::pool_finished(&mut state, 1, PoolSummary::default());
        assert!(state.refresh.saving);

        // A second cycle finishes before the first write reports back.
        state.refresh.active = Some(2);
        handlers::refresh::pool_finished(&mut state, 2, PoolSummary::default());
        assert!(state.refresh.save_pending);

        let first = next_save(&mut completions).await;
        assert!(completions.try_recv().is_err());
        handlers::refresh::cache_saved(&mut state, first);
        assert!(state.refresh.saving);
        assert!(!state.refresh.save_pending);

        let second = next_save(&mut completions).await;
        handlers::refresh::cache_saved(&mut state, second);
        assert!(!state.refresh.saving);

        let saved = drain(&mut events)
            .into_iter()
            .filter(|e| matches!(e, ViewEvent::CacheSaved(1)))
            .count();
        assert_eq!(saved, 2);
        assert!(completions.try_recv().is_err());
    }
}
