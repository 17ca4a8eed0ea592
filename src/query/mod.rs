// src/query/mod.rs
pub mod poller;
pub mod pool;
pub mod probe;
