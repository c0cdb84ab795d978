use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::kernel::error::{Error, PanicError, Result};
use crate::monitor::{
    dispatch, same_monitor, KernelMonitor, MonitorResult, ServiceEvent, ServiceEventKind, ServiceMonitor,
};
use crate::service::types::ServiceName;

#[derive(Default)]
struct MonitorTable {
    global: Vec<Arc<dyn ServiceMonitor>>,
    per_service: HashMap<ServiceName, Vec<Arc<dyn ServiceMonitor>>>,
}

/// Fans every event out to the global monitors plus the monitors registered
/// for the event's service.
///
/// Delivery works on a snapshot of the monitor table, so monitors may add or
/// remove monitors while being notified.
pub struct ServiceMonitorBroadcaster {
    kernel_monitor: Arc<dyn KernelMonitor>,
    monitors: Mutex<MonitorTable>,
}

impl ServiceMonitorBroadcaster {
    pub fn new(kernel_monitor: Arc<dyn KernelMonitor>) -> Self {
        Self {
            kernel_monitor,
            monitors: Mutex::new(MonitorTable::default()),
        }
    }

    /// Register `monitor` for every service, or only for `service` when given.
    pub fn add_service_monitor(&self, monitor: Arc<dyn ServiceMonitor>, service: Option<&ServiceName>) {
        let mut table = self.monitors.lock();
        let bucket = match service {
            Some(name) => table.per_service.entry(name.clone()).or_default(),
            None => &mut table.global,
        };
        if !bucket.iter().any(|m| same_monitor(m, &monitor)) {
            bucket.push(monitor);
        }
    }

    /// Remove `monitor` wherever it is registered. Returns true if it was found.
    pub fn remove_service_monitor(&self, monitor: &Arc<dyn ServiceMonitor>) -> bool {
        let mut table = self.monitors.lock();
        let before = table.global.len();
        table.global.retain(|m| !same_monitor(m, monitor));
        let mut found = table.global.len() != before;
        for bucket in table.per_service.values_mut() {
            let before = bucket.len();
            bucket.retain(|m| !same_monitor(m, monitor));
            found |= bucket.len() != before;
        }
        table.per_service.retain(|_, bucket| !bucket.is_empty());
        found
    }

    pub fn monitor_count(&self) -> usize {
        let table = self.monitors.lock();
        table.global.len() + table.per_service.values().map(Vec::len).sum::<usize>()
    }

    fn snapshot(&self, service: &ServiceName) -> Vec<Arc<dyn ServiceMonitor>> {
        let table = self.monitors.lock();
        let mut monitors = table.global.clone();
        if let Some(bucket) = table.per_service.get(service) {
            for monitor in bucket {
                if !monitors.iter().any(|m| same_monitor(m, monitor)) {
                    monitors.push(Arc::clone(monitor));
                }
            }
        }
        monitors
    }

    /// Deliver `event` to every interested monitor.
    ///
    /// A monitor failure (error or panic) is handed to the kernel monitor.
    /// Failures of the kernel monitor itself are collected and returned
    /// together once every monitor has been notified.
    pub fn fire(&self, kind: ServiceEventKind, event: &ServiceEvent) -> Result<()> {
        let mut errors = Vec::new();
        for monitor in self.snapshot(event.service_name()) {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| dispatch(monitor.as_ref(), kind, event)));
            let message = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(payload) => PanicError::from_payload(payload).to_string(),
            };
            let error = Error::MonitorNotification {
                name: event.service_name().clone(),
                event: kind.to_string(),
                message,
            };
            let reported = panic::catch_unwind(AssertUnwindSafe(|| {
                self.kernel_monitor.service_notification_error(&monitor, kind, event, &error)
            }));
            match reported {
                Ok(Ok(())) => {}
                Ok(Err(e)) => errors.push(Error::MonitorNotification {
                    name: event.service_name().clone(),
                    event: kind.to_string(),
                    message: format!("kernel monitor failed while reporting '{}': {}", error, e),
                }),
                Err(payload) => errors.push(Error::MonitorNotification {
                    name: event.service_name().clone(),
                    event: kind.to_string(),
                    message: format!(
                        "kernel monitor failed while reporting '{}': {}",
                        error,
                        PanicError::from_payload(payload)
                    ),
                }),
            }
        }
        Error::collect(errors).map_err(|e| match e {
            aggregate @ Error::KernelErrors(_) => aggregate,
            single => Error::KernelErrors(vec![single]),
        })
    }

    fn fire_as_monitor(&self, kind: ServiceEventKind, event: &ServiceEvent) -> MonitorResult {
        self.fire(kind, event).map_err(|e| Box::new(e) as _)
    }
}

impl ServiceMonitor for ServiceMonitorBroadcaster {
    fn service_registered(&self, event: &ServiceEvent) -> MonitorResult {
        self.fire_as_monitor(ServiceEventKind::Registered, event)
    }

    fn service_starting(&self, event: &ServiceEvent) -> MonitorResult {
        self.fire_as_monitor(ServiceEventKind::Starting, event)
    }

    fn service_waiting_to_start(&self, event: &ServiceEvent) -> MonitorResult {
        self.fire_as_monitor(ServiceEventKind::WaitingToStart, event)
    }

    fn service_start_error(&self, event: &ServiceEvent) -> MonitorResult {
        self.fire_as_monitor(ServiceEventKind::StartError, event)
    }

    fn service_running(&self, event: &ServiceEvent) -> MonitorResult {
        self.fire_as_monitor(ServiceEventKind::Running, event)
    }

    fn service_stopping(&self, event: &ServiceEvent) -> MonitorResult {
        self.fire_as_monitor(ServiceEventKind::Stopping, event)
    }

    fn service_waiting_to_stop(&self, event: &ServiceEvent) -> MonitorResult {
        self.fire_as_monitor(ServiceEventKind::WaitingToStop, event)
    }

    fn service_stop_error(&self, event: &ServiceEvent) -> MonitorResult {
        self.fire_as_monitor(ServiceEventKind::StopError, event)
    }

    fn service_stopped(&self, event: &ServiceEvent) -> MonitorResult {
        self.fire_as_monitor(ServiceEventKind::Stopped, event)
    }

    fn service_unregistered(&self, event: &ServiceEvent) -> MonitorResult {
        self.fire_as_monitor(ServiceEventKind::Unregistered, event)
    }
}

impl fmt::Debug for ServiceMonitorBroadcaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceMonitorBroadcaster")
            .field("monitors", &self.monitor_count())
            .finish_non_exhaustive()
    }
}
