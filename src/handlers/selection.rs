// src/handlers/selection.rs
use log::debug;

use crate::engine::{Completion, EngineState, ViewEvent};
use crate::handlers::view::{publish, update_row};
use crate::query::poller::PollReport;

pub(crate) fn select(state: &mut EngineState, index: usize) {
    let Some(record) = state.visible.get(index) else {
        debug!("Selection {} is out of range ({} visible)", index, state.visible.len());
        clear(state);
        return;
    };

    let endpoint = record.endpoint();
    let completions = state.completions();
    state.selection.select(endpoint, move |token, report| {
        let _ = completions.send(Completion::Poll { token, report });
    });
    publish(state);
}

pub(crate) fn clear(state: &mut EngineState) {
    if state.selection.current().is_some() {
        state.selection.cancel();
        publish(state);
    }
}

pub(crate) fn poll_report(state: &mut EngineState, token: u64, report: PollReport) {
    if !state.selection.accepts(token) {
        debug!("Dropping stale poll result for {}", report.endpoint);
        return;
    }

    state.storage.apply_outcome(&report.endpoint, &report.outcome);
    update_row(state, &report.endpoint);

    let ping_ms = report.outcome.status.ping.as_millis() as i64;
    let (samples, stats) = state.selection.record_ping(ping_ms);
    state.emit(ViewEvent::PingHistory { samples, stats });
    state.emit(ViewEvent::Players {
        names: report.players,
        count: report.outcome.status.players,
    });
    state.emit(ViewEvent::Rules(report.rules));
}
