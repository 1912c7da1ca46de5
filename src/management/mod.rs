//! Capability traits over the OS management interfaces: the service control
//! manager and the process / performance-counter query facility.
//!
//! Collectors only ever talk to these traits. `fake` backs tests and the demo
//! mode, `system` is the portable `sysinfo` backend and `windows` goes through
//! WMI.

pub mod fake;
pub mod system;
#[cfg(windows)]
pub mod windows;

use crate::utils::errors::InterfaceError;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceStatus {
    /// Native service control manager state code (1 = stopped .. 7 = paused).
    pub state: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub display_name: String,
    /// Native start type code (0 = boot .. 4 = disabled).
    pub start_type: u32,
}

/// An open handle on a single service.
pub trait ServiceHandle {
    fn query_status(&self) -> Result<ServiceStatus, InterfaceError>;
    fn query_config(&self) -> Result<ServiceConfig, InterfaceError>;
    fn close(&mut self);
}

/// A connection to the service registry. Disconnects when dropped.
pub trait ServiceManager {
    fn list_service_names(&self) -> Result<Vec<String>, InterfaceError>;
    fn open_service(&self, name: &str) -> Result<Box<dyn ServiceHandle>, InterfaceError>;
}

/// Acquires a fresh `ServiceManager` for each collection cycle.
pub trait ManagerProvider: Send + Sync {
    fn connect(&self) -> Result<Box<dyn ServiceManager>, InterfaceError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub process_id: u32,
    pub name: String,
    pub command_line: String,
}

/// Per-process performance counters from one poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawCounterSample {
    pub process_id: u32,
    pub name: String,
    pub percent_processor_time: u64,
    pub private_bytes: u64,
    pub working_set: u64,
    pub handle_count: u32,
    pub thread_count: u32,
    pub io_read_bytes_per_sec: u64,
    pub io_write_bytes_per_sec: u64,
}

#[async_trait]
pub trait PerformanceQueryClient: Send + Sync + 'static {
    /// List running processes whose image name is `executable`.
    async fn list_processes(&self, executable: &str) -> Result<Vec<ProcessInfo>, InterfaceError>;

    /// Counter samples for every process on the host.
    async fn query_counters(&self) -> Result<Vec<RawCounterSample>, InterfaceError>;
}
