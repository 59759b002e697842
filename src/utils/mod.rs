// src/utils/mod.rs
//! Shared helpers: errors, configuration, time

pub mod config;
pub mod errors;
pub mod time;
