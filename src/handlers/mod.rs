// src/handlers/mod.rs
pub(crate) mod refresh;
pub(crate) mod selection;
pub(crate) mod view;
