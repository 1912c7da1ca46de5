//! In-memory management backends with scriptable failures.

use super::{
    ManagerProvider, PerformanceQueryClient, ProcessInfo, RawCounterSample, ServiceConfig,
    ServiceHandle, ServiceManager, ServiceStatus,
};
use crate::utils::errors::InterfaceError;
use crate::utils::psutils::same_executable;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Default)]
pub struct FakeService {
    pub name: String,
    pub display_name: String,
    pub state: u32,
    pub start_type: u32,
    pub open_error: Option<InterfaceError>,
    pub status_error: Option<InterfaceError>,
    pub config_error: Option<InterfaceError>,
}

impl FakeService {
    pub fn new(name: &str, display_name: &str, state: u32, start_type: u32) -> Self {
        Self {
            name: name.to_string(),
            display_name: display_name.to_string(),
            state,
            start_type,
            ..Default::default()
        }
    }

    pub fn failing_open(mut self, err: InterfaceError) -> Self {
        self.open_error = Some(err);
        self
    }

    pub fn failing_status(mut self, err: InterfaceError) -> Self {
        self.status_error = Some(err);
        self
    }

    pub fn failing_config(mut self, err: InterfaceError) -> Self {
        self.config_error = Some(err);
        self
    }
}

/// Service registry backed by a fixed list. Clones share handle counters.
#[derive(Debug, Clone, Default)]
pub struct FakeServiceManager {
    services: Arc<Vec<FakeService>>,
    list_error: Option<InterfaceError>,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl FakeServiceManager {
    pub fn new(services: Vec<FakeService>) -> Self {
        Self {
            services: Arc::new(services),
            ..Default::default()
        }
    }

    pub fn failing_list(mut self, err: InterfaceError) -> Self {
        self.list_error = Some(err);
        self
    }

    /// Handles successfully opened so far.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl ServiceManager for FakeServiceManager {
    fn list_service_names(&self) -> Result<Vec<String>, InterfaceError> {
        if let Some(err) = &self.list_error {
            return Err(err.clone());
        }
        Ok(self.services.iter().map(|s| s.name.clone()).collect())
    }

    fn open_service(&self, name: &str) -> Result<Box<dyn ServiceHandle>, InterfaceError> {
        let service = self
            .services
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| {
                InterfaceError::Failed("the specified service does not exist".to_string())
            })?;
        if let Some(err) = &service.open_error {
            return Err(err.clone());
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeServiceHandle {
            service: service.clone(),
            closed: Arc::clone(&self.closed),
            is_closed: false,
        }))
    }
}

impl ManagerProvider for FakeServiceManager {
    fn connect(&self) -> Result<Box<dyn ServiceManager>, InterfaceError> {
        Ok(Box::new(self.clone()))
    }
}

struct FakeServiceHandle {
    service: FakeService,
    closed: Arc<AtomicUsize>,
    is_closed: bool,
}

impl ServiceHandle for FakeServiceHandle {
    fn query_status(&self) -> Result<ServiceStatus, InterfaceError> {
        match &self.service.status_error {
            Some(err) => Err(err.clone()),
            None => Ok(ServiceStatus {
                state: self.service.state,
            }),
        }
    }

    fn query_config(&self) -> Result<ServiceConfig, InterfaceError> {
        match &self.service.config_error {
            Some(err) => Err(err.clone()),
            None => Ok(ServiceConfig {
                display_name: self.service.display_name.clone(),
                start_type: self.service.start_type,
            }),
        }
    }

    fn close(&mut self) {
        if !self.is_closed {
            self.is_closed = true;
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[derive(Debug, Default)]
struct FakePerfState {
    processes: Vec<ProcessInfo>,
    samples: Vec<RawCounterSample>,
    process_error: Option<InterfaceError>,
    counter_error: Option<InterfaceError>,
    process_queries: usize,
    counter_queries: usize,
}

/// Performance-counter client whose answers can be swapped while loops run.
#[derive(Debug, Clone, Default)]
pub struct FakePerfClient {
    state: Arc<Mutex<FakePerfState>>,
}

impl FakePerfClient {
    pub fn new(processes: Vec<ProcessInfo>, samples: Vec<RawCounterSample>) -> Self {
        let client = Self::default();
        client.set_processes(processes);
        client.set_samples(samples);
        client
    }

    fn lock(&self) -> MutexGuard<'_, FakePerfState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_processes(&self, processes: Vec<ProcessInfo>) {
        self.lock().processes = processes;
    }

    pub fn set_samples(&self, samples: Vec<RawCounterSample>) {
        self.lock().samples = samples;
    }

    pub fn fail_processes(&self, err: Option<InterfaceError>) {
        self.lock().process_error = err;
    }

    pub fn fail_counters(&self, err: Option<InterfaceError>) {
        self.lock().counter_error = err;
    }

    pub fn process_queries(&self) -> usize {
        self.lock().process_queries
    }

    pub fn counter_queries(&self) -> usize {
        self.lock().counter_queries
    }
}

#[async_trait]
impl PerformanceQueryClient for FakePerfClient {
    async fn list_processes(&self, executable: &str) -> Result<Vec<ProcessInfo>, InterfaceError> {
        let mut state = self.lock();
        state.process_queries += 1;
        if let Some(err) = &state.process_error {
            return Err(err.clone());
        }
        Ok(state
            .processes
            .iter()
            .filter(|p| same_executable(&p.name, executable))
            .cloned()
            .collect())
    }

    async fn query_counters(&self) -> Result<Vec<RawCounterSample>, InterfaceError> {
        let mut state = self.lock();
        state.counter_queries += 1;
        if let Some(err) = &state.counter_error {
            return Err(err.clone());
        }
        Ok(state.samples.clone())
    }
}

/// A small host for demo runs: a handful of services and two IIS pools.
pub fn demo_services() -> FakeServiceManager {
    FakeServiceManager::new(vec![
        FakeService::new("LanmanServer", "Server", 4, 2),
        FakeService::new("Spooler", "Print Spooler", 4, 2),
        FakeService::new("W3SVC", "World Wide Web Publishing Service", 4, 2),
        FakeService::new("wuauserv", "", 1, 3),
        FakeService::new("WinDefend", "Microsoft Defender Antivirus Service", 4, 2)
            .failing_config(InterfaceError::PermissionDenied("WinDefend".to_string())),
    ])
}

pub fn demo_perf_client() -> FakePerfClient {
    let process = |process_id: u32, pool: &str| ProcessInfo {
        process_id,
        name: "w3wp.exe".to_string(),
        command_line: format!(r#"c:\windows\system32\inetsrv\w3wp.exe -ap "{pool}" -v "v4.0""#),
    };
    let sample = |process_id: u32, cpu: u64, working_set: u64| RawCounterSample {
        process_id,
        name: "w3wp".to_string(),
        percent_processor_time: cpu,
        private_bytes: working_set * 2,
        working_set,
        handle_count: 800,
        thread_count: 40,
        io_read_bytes_per_sec: 4096,
        io_write_bytes_per_sec: 1024,
    };
    FakePerfClient::new(
        vec![process(4120, "DefaultAppPool"), process(5388, "Intranet")],
        vec![
            sample(4, 1, 1 << 20),
            sample(4120, 12, 180 << 20),
            sample(5388, 3, 95 << 20),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_counted() {
        let manager = FakeServiceManager::new(vec![FakeService::new("svc", "", 4, 2)]);
        let mut handle = manager.open_service("svc").unwrap();
        assert_eq!(handle.query_status().unwrap().state, 4);
        handle.close();
        handle.close();
        assert_eq!(manager.opened(), 1);
        assert_eq!(manager.closed(), 1);
        assert!(manager.open_service("missing").is_err());
    }

    #[tokio::test]
    async fn test_perf_client_filters_by_executable() {
        let client = demo_perf_client();
        let mut processes = client.list_processes("W3WP.EXE").await.unwrap();
        processes.sort_by_key(|p| p.process_id);
        assert_eq!(processes.len(), 2);
        assert_eq!(processes[0].process_id, 4120);
        assert!(client.list_processes("svchost.exe").await.unwrap().is_empty());
        assert_eq!(client.process_queries(), 2);
    }
}
