//! Polls the OS service registry and per-process performance counters and
//! turns them into `win_services` and `w3wp` metrics.

pub mod collectors;
pub mod config;
pub mod emit;
pub mod input;
pub mod management;
pub mod metric;
pub mod utils;
