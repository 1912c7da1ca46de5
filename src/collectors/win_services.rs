use crate::config::WinServicesConfig;
use crate::emit::emit_service;
use crate::input::Input;
use crate::management::{ManagerProvider, ServiceHandle, ServiceManager};
use crate::metric::Accumulator;
use crate::utils::errors::{
    EntityAccessError, InterfaceError, ManagementInterfaceError, MonitoringError,
};
use crate::utils::filter::IdentityFilter;
use itertools::Itertools;
use log::{debug, error, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub name: String,
    pub display_name: String,
    /// Native state code, passed through untouched.
    pub state: u32,
    /// Native start type code, passed through untouched.
    pub startup_mode: u32,
}

/// Result of one collection pass: what resolved, and what was skipped.
#[derive(Debug, Default)]
pub struct ServiceSnapshot {
    pub records: Vec<ServiceRecord>,
    pub failures: Vec<EntityAccessError>,
}

/// Closes the wrapped handle however the scope is left.
struct OpenedService(Box<dyn ServiceHandle>);

impl Drop for OpenedService {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Resolve every service the filter admits. Only a failure to list services
/// aborts the pass; per-service failures are logged and skipped.
pub fn collect(
    manager: &dyn ServiceManager,
    filter: &IdentityFilter,
) -> Result<ServiceSnapshot, ManagementInterfaceError> {
    let names = manager
        .list_service_names()
        .map_err(|source| ManagementInterfaceError {
            context: "could not list services",
            source,
        })?;

    let (records, failures): (Vec<_>, Vec<_>) = names
        .into_iter()
        .filter(|name| filter.matches(name))
        .map(|name| resolve_service(manager, name))
        .partition_result();

    for failure in &failures {
        if failure.is_permission() {
            debug!("{failure}");
        } else {
            error!("{failure}");
        }
    }

    Ok(ServiceSnapshot { records, failures })
}

fn access_error(
    operation: &'static str,
    entity: &str,
) -> impl FnOnce(InterfaceError) -> EntityAccessError {
    let entity = entity.to_string();
    move |source| EntityAccessError {
        operation,
        entity,
        source,
    }
}

fn resolve_service(
    manager: &dyn ServiceManager,
    name: String,
) -> Result<ServiceRecord, EntityAccessError> {
    let service = OpenedService(
        manager
            .open_service(&name)
            .map_err(access_error("could not open service", &name))?,
    );
    let status = service
        .0
        .query_status()
        .map_err(access_error("could not query service", &name))?;
    let config = service
        .0
        .query_config()
        .map_err(access_error("could not get config of service", &name))?;

    Ok(ServiceRecord {
        name,
        display_name: config.display_name,
        state: status.state,
        startup_mode: config.start_type,
    })
}

/// Windows service state input.
pub struct WinServices {
    config: WinServicesConfig,
    provider: Option<Box<dyn ManagerProvider>>,
    filter: Option<IdentityFilter>,
}

impl WinServices {
    pub fn new(config: WinServicesConfig, provider: Box<dyn ManagerProvider>) -> Self {
        Self {
            config,
            provider: Some(provider),
            filter: None,
        }
    }

    /// Uses the service control manager where one exists; elsewhere the input
    /// initializes but gathers nothing.
    pub fn for_platform(config: WinServicesConfig) -> Self {
        #[cfg(windows)]
        let provider: Option<Box<dyn ManagerProvider>> =
            Some(Box::new(crate::management::windows::WmiManagerProvider));
        #[cfg(not(windows))]
        let provider: Option<Box<dyn ManagerProvider>> = None;

        Self {
            config,
            provider,
            filter: None,
        }
    }
}

impl Input for WinServices {
    fn name(&self) -> &'static str {
        "win_services"
    }

    fn init(&mut self) -> Result<(), MonitoringError> {
        let filter = IdentityFilter::build(
            &self.config.service_names,
            &self.config.excluded_service_names,
        )?;
        self.filter = Some(filter);
        if self.provider.is_none() {
            warn!("[inputs.{}] current platform is not supported", self.name());
        }
        Ok(())
    }

    fn gather(&self, acc: &mut dyn Accumulator) -> Result<(), MonitoringError> {
        let (Some(provider), Some(filter)) = (&self.provider, &self.filter) else {
            return Ok(());
        };

        let manager = provider.connect().map_err(|source| ManagementInterfaceError {
            context: "could not open service manager",
            source,
        })?;
        let snapshot = collect(manager.as_ref(), filter)?;
        for record in &snapshot.records {
            emit_service(acc, record);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::management::fake::{FakeService, FakeServiceManager};
    use crate::metric::MetricBuffer;

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn three_services() -> FakeServiceManager {
        FakeServiceManager::new(vec![
            FakeService::new("svcA", "Service A", 4, 2),
            FakeService::new("SVCB", "Service B", 1, 3),
            FakeService::new("svcC", "", 4, 4),
        ])
    }

    fn sorted_names(snapshot: &ServiceSnapshot) -> Vec<String> {
        snapshot.records.iter().map(|r| r.name.clone()).sorted().collect()
    }

    #[test]
    fn test_include_filter_is_case_insensitive() {
        let manager = three_services();
        let filter = IdentityFilter::build(&names(&["svca"]), &[]).unwrap();
        let snapshot = collect(&manager, &filter).unwrap();

        assert_eq!(
            snapshot.records,
            vec![ServiceRecord {
                name: "svcA".to_string(),
                display_name: "Service A".to_string(),
                state: 4,
                startup_mode: 2,
            }]
        );
        assert!(snapshot.failures.is_empty());
        assert_eq!(manager.opened(), 1);
    }

    #[test]
    fn test_collect_is_idempotent() {
        let manager = three_services();
        let filter = IdentityFilter::build(&[], &names(&["svcc"])).unwrap();
        let first = collect(&manager, &filter).unwrap();
        let second = collect(&manager, &filter).unwrap();
        assert_eq!(sorted_names(&first), vec!["SVCB", "svcA"]);
        assert_eq!(sorted_names(&first), sorted_names(&second));
    }

    #[test]
    fn test_entity_failure_does_not_abort_cycle() {
        let manager = FakeServiceManager::new(vec![
            FakeService::new("A", "", 4, 2),
            FakeService::new("B", "", 4, 2)
                .failing_open(InterfaceError::Failed("the handle is invalid".to_string())),
            FakeService::new("C", "", 1, 3),
        ]);
        let filter = IdentityFilter::default();
        let snapshot = collect(&manager, &filter).unwrap();

        assert_eq!(sorted_names(&snapshot), vec!["A", "C"]);
        assert_eq!(snapshot.failures.len(), 1);
        assert_eq!(snapshot.failures[0].entity, "B");
        assert_eq!(snapshot.failures[0].operation, "could not open service");
        assert!(!snapshot.failures[0].is_permission());
    }

    #[test]
    fn test_handles_closed_when_query_fails() {
        let manager = FakeServiceManager::new(vec![
            FakeService::new("status", "", 4, 2)
                .failing_status(InterfaceError::Failed("rpc unavailable".to_string())),
            FakeService::new("config", "", 4, 2)
                .failing_config(InterfaceError::PermissionDenied("config".to_string())),
            FakeService::new("ok", "", 4, 2),
        ]);
        let snapshot = collect(&manager, &IdentityFilter::default()).unwrap();

        assert_eq!(sorted_names(&snapshot), vec!["ok"]);
        assert_eq!(manager.opened(), 3);
        assert_eq!(manager.closed(), 3);
        let permission: Vec<_> = snapshot.failures.iter().filter(|f| f.is_permission()).collect();
        assert_eq!(permission.len(), 1);
        assert_eq!(permission[0].entity, "config");
    }

    #[test]
    fn test_list_failure_is_fatal() {
        let manager = three_services()
            .failing_list(InterfaceError::PermissionDenied("SCManager".to_string()));
        let err = collect(&manager, &IdentityFilter::default()).unwrap_err();
        assert_eq!(err.context, "could not list services");
        assert_eq!(manager.opened(), 0);
    }

    #[test]
    fn test_input_emits_filtered_services() {
        let config = WinServicesConfig {
            service_names: names(&["svc*"]),
            excluded_service_names: names(&["SVCB"]),
        };
        let mut input = WinServices::new(config, Box::new(three_services()));
        input.init().unwrap();

        let mut buffer = MetricBuffer::new();
        input.gather(&mut buffer).unwrap();

        let metrics = buffer.metrics();
        assert_eq!(metrics.len(), 2);
        assert!(metrics.iter().all(|m| m.measurement == "win_services"));
        let svc_c = metrics.iter().find(|m| m.tag("service_name") == Some("svcC")).unwrap();
        assert!(!svc_c.tags.contains_key("display_name"));
    }

    #[test]
    fn test_input_rejects_bad_pattern() {
        let config = WinServicesConfig {
            service_names: names(&["svc["]),
            excluded_service_names: vec![],
        };
        let mut input = WinServices::new(config, Box::new(three_services()));
        assert!(matches!(input.init(), Err(MonitoringError::Config(_))));
    }

    #[test]
    fn test_input_surfaces_list_failure() {
        let manager = three_services().failing_list(InterfaceError::Failed("rpc down".to_string()));
        let mut input = WinServices::new(WinServicesConfig::default(), Box::new(manager));
        input.init().unwrap();

        let mut buffer = MetricBuffer::new();
        let result = input.gather(&mut buffer);
        assert!(matches!(result, Err(MonitoringError::ManagementInterface(_))));
        assert!(buffer.is_empty());
    }
}
