//! Portable process backend built on `sysinfo`.
//!
//! `sysinfo` has no private-bytes or handle-count counters: virtual memory
//! stands in for private bytes and handle count is reported as zero. I/O rates
//! are derived from the byte deltas between two consecutive refreshes.

use super::{PerformanceQueryClient, ProcessInfo, RawCounterSample};
use crate::utils::errors::InterfaceError;
use crate::utils::psutils::{render_command_line, same_executable};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

struct SystemState {
    system: System,
    last_refresh: Option<Instant>,
}

#[derive(Clone)]
pub struct SystemPerfClient {
    state: Arc<Mutex<SystemState>>,
}

impl SystemPerfClient {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SystemState {
                system: System::new(),
                last_refresh: None,
            })),
        }
    }

    async fn with_state<T, F>(&self, f: F) -> Result<T, InterfaceError>
    where
        T: Send + 'static,
        F: FnOnce(&mut SystemState) -> T + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        tokio::task::spawn_blocking(move || {
            let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut state)
        })
        .await
        .map_err(|err| InterfaceError::Failed(format!("process query task failed: {err}")))
    }
}

impl Default for SystemPerfClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PerformanceQueryClient for SystemPerfClient {
    async fn list_processes(&self, executable: &str) -> Result<Vec<ProcessInfo>, InterfaceError> {
        let executable = executable.to_string();
        self.with_state(move |state| {
            state.system.refresh_processes_specifics(
                ProcessesToUpdate::All,
                true,
                ProcessRefreshKind::nothing().with_cmd(UpdateKind::OnlyIfNotSet),
            );
            state
                .system
                .processes()
                .iter()
                .filter(|(_, process)| {
                    same_executable(&process.name().to_string_lossy(), &executable)
                })
                .map(|(pid, process)| ProcessInfo {
                    process_id: pid.as_u32(),
                    name: process.name().to_string_lossy().into_owned(),
                    command_line: render_command_line(process.cmd()),
                })
                .collect()
        })
        .await
    }

    async fn query_counters(&self) -> Result<Vec<RawCounterSample>, InterfaceError> {
        self.with_state(|state| {
            state.system.refresh_processes_specifics(
                ProcessesToUpdate::All,
                true,
                ProcessRefreshKind::everything(),
            );
            let now = Instant::now();
            let elapsed = state
                .last_refresh
                .replace(now)
                .map(|previous| now.duration_since(previous).as_secs_f64())
                .filter(|secs| *secs > 0.0);
            let per_sec = |bytes: u64| match elapsed {
                Some(secs) => (bytes as f64 / secs) as u64,
                None => 0,
            };

            state
                .system
                .processes()
                .iter()
                .map(|(pid, process)| {
                    let disk = process.disk_usage();
                    RawCounterSample {
                        process_id: pid.as_u32(),
                        name: process.name().to_string_lossy().into_owned(),
                        percent_processor_time: process.cpu_usage().max(0.0).round() as u64,
                        private_bytes: process.virtual_memory(),
                        working_set: process.memory(),
                        handle_count: 0,
                        thread_count: process
                            .tasks()
                            .map(|tasks| tasks.len() as u32)
                            .unwrap_or(0),
                        io_read_bytes_per_sec: per_sec(disk.read_bytes),
                        io_write_bytes_per_sec: per_sec(disk.written_bytes),
                    }
                })
                .collect()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counters_include_current_process() {
        let client = SystemPerfClient::new();
        let samples = client.query_counters().await.unwrap();
        let own = std::process::id();
        let sample = samples
            .iter()
            .find(|s| s.process_id == own)
            .expect("current process should be listed");
        assert!(sample.working_set > 0);
        // First refresh has no baseline for rates.
        assert_eq!(sample.io_read_bytes_per_sec, 0);
    }

    #[tokio::test]
    async fn test_unknown_executable_lists_nothing() {
        let client = SystemPerfClient::new();
        let processes = client
            .list_processes("definitely-not-running-winperf-test.exe")
            .await
            .unwrap();
        assert!(processes.is_empty());
    }
}
