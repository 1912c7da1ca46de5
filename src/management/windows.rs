//! WMI backed service registry and performance counters.
//!
//! `WMIConnection` is tied to the COM apartment of the thread that created it,
//! so connections are created per call and counter queries run on the blocking
//! pool.

#![allow(non_snake_case, non_camel_case_types)]

use super::{
    ManagerProvider, PerformanceQueryClient, ProcessInfo, RawCounterSample, ServiceConfig,
    ServiceHandle, ServiceManager, ServiceStatus,
};
use crate::utils::errors::InterfaceError;
use async_trait::async_trait;
use serde::Deserialize;
use wmi::{COMLibrary, WMIConnection, WMIError};

const WBEM_E_ACCESS_DENIED: &str = "0x80041003";
const E_ACCESSDENIED: &str = "0x80070005";

fn classify(err: WMIError) -> InterfaceError {
    let message = err.to_string();
    let lowered = message.to_ascii_lowercase();
    if lowered.contains(WBEM_E_ACCESS_DENIED)
        || lowered.contains(E_ACCESSDENIED)
        || lowered.contains("access denied")
        || lowered.contains("access is denied")
    {
        InterfaceError::PermissionDenied(message)
    } else {
        InterfaceError::Failed(message)
    }
}

fn connect() -> Result<WMIConnection, InterfaceError> {
    let com = COMLibrary::new().map_err(classify)?;
    WMIConnection::new(com).map_err(classify)
}

fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Service control manager state code for a `Win32_Service.State` value.
pub fn state_code(state: &str) -> Option<u32> {
    match state {
        "Stopped" => Some(1),
        "Start Pending" => Some(2),
        "Stop Pending" => Some(3),
        "Running" => Some(4),
        "Continue Pending" => Some(5),
        "Pause Pending" => Some(6),
        "Paused" => Some(7),
        _ => None,
    }
}

/// Service control manager start type code for a `Win32_Service.StartMode` value.
pub fn start_type_code(start_mode: &str) -> Option<u32> {
    match start_mode {
        "Boot" => Some(0),
        "System" => Some(1),
        "Auto" => Some(2),
        "Manual" => Some(3),
        "Disabled" => Some(4),
        _ => None,
    }
}

#[derive(Deserialize)]
struct Win32_ServiceName {
    Name: String,
}

#[derive(Deserialize, Clone)]
struct Win32_Service {
    Name: String,
    DisplayName: Option<String>,
    State: String,
    StartMode: String,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WmiManagerProvider;

impl ManagerProvider for WmiManagerProvider {
    fn connect(&self) -> Result<Box<dyn ServiceManager>, InterfaceError> {
        Ok(Box::new(WmiServiceManager { conn: connect()? }))
    }
}

pub struct WmiServiceManager {
    conn: WMIConnection,
}

impl ServiceManager for WmiServiceManager {
    fn list_service_names(&self) -> Result<Vec<String>, InterfaceError> {
        let rows: Vec<Win32_ServiceName> = self
            .conn
            .raw_query("SELECT Name FROM Win32_Service")
            .map_err(classify)?;
        Ok(rows.into_iter().map(|row| row.Name).collect())
    }

    fn open_service(&self, name: &str) -> Result<Box<dyn ServiceHandle>, InterfaceError> {
        let rows: Vec<Win32_Service> = self
            .conn
            .raw_query(format!(
                "SELECT Name, DisplayName, State, StartMode FROM Win32_Service WHERE Name = '{}'",
                quote(name)
            ))
            .map_err(classify)?;
        let service = rows
            .into_iter()
            .next()
            .ok_or_else(|| {
                InterfaceError::Failed("the specified service does not exist".to_string())
            })?;
        Ok(Box::new(WmiServiceHandle { service }))
    }
}

struct WmiServiceHandle {
    service: Win32_Service,
}

impl ServiceHandle for WmiServiceHandle {
    fn query_status(&self) -> Result<ServiceStatus, InterfaceError> {
        let state = state_code(&self.service.State).ok_or_else(|| {
            InterfaceError::Failed(format!("unrecognized state {:?}", self.service.State))
        })?;
        Ok(ServiceStatus { state })
    }

    fn query_config(&self) -> Result<ServiceConfig, InterfaceError> {
        let start_type = start_type_code(&self.service.StartMode).ok_or_else(|| {
            InterfaceError::Failed(format!("unrecognized start mode {:?}", self.service.StartMode))
        })?;
        Ok(ServiceConfig {
            display_name: self.service.DisplayName.clone().unwrap_or_default(),
            start_type,
        })
    }

    fn close(&mut self) {}
}

#[derive(Deserialize)]
struct Win32_Process {
    ProcessId: u32,
    Name: String,
    CommandLine: Option<String>,
}

#[derive(Deserialize)]
struct Win32_PerfFormattedData_PerfProc_Process {
    IDProcess: u32,
    Name: String,
    PercentProcessorTime: u64,
    PrivateBytes: u64,
    WorkingSet: u64,
    HandleCount: u32,
    ThreadCount: u32,
    IOReadBytesPerSec: u64,
    IOWriteBytesPerSec: u64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WmiPerfClient;

async fn blocking_query<T, F>(f: F) -> Result<T, InterfaceError>
where
    T: Send + 'static,
    F: FnOnce(&WMIConnection) -> Result<T, WMIError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let conn = connect()?;
        f(&conn).map_err(classify)
    })
    .await
    .map_err(|err| InterfaceError::Failed(format!("WMI query task failed: {err}")))?
}

#[async_trait]
impl PerformanceQueryClient for WmiPerfClient {
    async fn list_processes(&self, executable: &str) -> Result<Vec<ProcessInfo>, InterfaceError> {
        let query = format!(
            "SELECT ProcessId, Name, CommandLine FROM Win32_Process WHERE Name = '{}'",
            quote(executable)
        );
        let rows: Vec<Win32_Process> = blocking_query(move |conn| conn.raw_query(query)).await?;
        Ok(rows
            .into_iter()
            .map(|row| ProcessInfo {
                process_id: row.ProcessId,
                name: row.Name,
                command_line: row.CommandLine.unwrap_or_default(),
            })
            .collect())
    }

    async fn query_counters(&self) -> Result<Vec<RawCounterSample>, InterfaceError> {
        let rows: Vec<Win32_PerfFormattedData_PerfProc_Process> = blocking_query(|conn| {
            conn.raw_query(
                "SELECT IDProcess, Name, PercentProcessorTime, PrivateBytes, WorkingSet, \
                 HandleCount, ThreadCount, IOReadBytesPerSec, IOWriteBytesPerSec \
                 FROM Win32_PerfFormattedData_PerfProc_Process",
            )
        })
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| RawCounterSample {
                process_id: row.IDProcess,
                name: row.Name,
                percent_processor_time: row.PercentProcessorTime,
                private_bytes: row.PrivateBytes,
                working_set: row.WorkingSet,
                handle_count: row.HandleCount,
                thread_count: row.ThreadCount,
                io_read_bytes_per_sec: row.IOReadBytesPerSec,
                io_write_bytes_per_sec: row.IOWriteBytesPerSec,
            })
            .collect())
    }
}
