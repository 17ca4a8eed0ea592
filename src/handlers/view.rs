// src/handlers/view.rs
use log::debug;

use crate::engine::{EngineState, ViewEvent};
use crate::models::server::Endpoint;
use crate::view::{self, VersionTag};

pub(crate) fn set_search(state: &mut EngineState, text: String) {
    if state.query.search == text {
        return;
    }
    state.query.search = text;
    state.emit(ViewEvent::FilterSummary(state.query.summary()));
    recompute(state);
}

pub(crate) fn toggle_filter(state: &mut EngineState, tag: VersionTag) {
    let enabled = state.query.toggle(tag);
    debug!("Version filter {} {}", tag, if enabled { "on" } else { "off" });
    state.emit(ViewEvent::FilterSummary(state.query.summary()));
    recompute(state);
}

pub(crate) fn cycle_sort(state: &mut EngineState) {
    state.query.sort = state.query.sort.next();
    state.status(format!("Sort: {}", state.query.sort.label()));
    recompute(state);
}

/// Rebuilds the visible list from the snapshot. A selection that fell out of
/// view stops being polled.
pub(crate) fn recompute(state: &mut EngineState) {
    state.visible = view::apply(state.storage.records(), &state.query);

    if let Some(selected) = state.selection.current().cloned() {
        if !state.visible.iter().any(|r| r.is(&selected)) {
            debug!("{} is no longer visible, dropping selection", selected);
            state.selection.cancel();
        }
    }
    publish(state);
    state.emit(ViewEvent::Table(state.visible.clone()));
}

/// Patches one row in place instead of rebuilding the whole list.
pub(crate) fn update_row(state: &mut EngineState, endpoint: &Endpoint) {
    let Some(record) = state.storage.get(endpoint).cloned() else {
        return;
    };

    {
        let mut published = state.published.write();
        if let Some(slot) = published.records.iter_mut().find(|r| r.is(endpoint)) {
            *slot = record.clone();
        }
        if let Some(slot) = published.visible.iter_mut().find(|r| r.is(endpoint)) {
            *slot = record.clone();
        }
    }

    if let Some(index) = state.visible.iter().position(|r| r.is(endpoint)) {
        state.visible[index] = record.clone();
        state.emit(ViewEvent::Row { index, record });
    }
}

pub(crate) fn publish(state: &EngineState) {
    let mut published = state.published.write();
    published.records = state.storage.records().to_vec();
    published.visible = state.visible.clone();
    published.query = state.query.clone();
    published.selected = state.selection.current().cloned();
    published.refreshing = state.refresh.running;
}
