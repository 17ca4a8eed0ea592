// src/lib.rs
pub mod config;
pub mod directory;
pub mod engine;
mod handlers;
pub mod models;
pub mod query;
pub mod storage;
pub mod utils;
pub mod view;

pub use config::Config;
pub use engine::{Engine, EngineHandle, ViewEvent, ViewSnapshot};
pub use models::server::{Endpoint, ProbeOutcome, Rules, ServerRecord, ServerStatus};
pub use query::probe::ProbeClient;
pub use utils::BrowserError;
pub use view::{SortMode, VersionTag, ViewQuery};
