use std::sync::Arc;

use log::{debug, info, warn};

use crate::kernel::error::Error;
use crate::monitor::{KernelMonitor, MonitorResult, ServiceEvent, ServiceEventKind, ServiceMonitor};

/// Writes every lifecycle transition to the `log` facade.
///
/// Transitions go out at `debug`, or at `info` when built with
/// [`LoggingServiceMonitor::verbose`]; error events always use `warn`.
#[derive(Debug, Default, Clone)]
pub struct LoggingServiceMonitor {
    verbose: bool,
}

impl LoggingServiceMonitor {
    pub fn new() -> Self {
        Self { verbose: false }
    }

    pub fn verbose() -> Self {
        Self { verbose: true }
    }

    fn transition(&self, kind: ServiceEventKind, event: &ServiceEvent) -> MonitorResult {
        if self.verbose {
            info!("[event {}] {} {}", event.event_id(), kind, event.service_name());
        } else {
            debug!("[event {}] {} {}", event.event_id(), kind, event.service_name());
        }
        Ok(())
    }
}

impl ServiceMonitor for LoggingServiceMonitor {
    fn service_registered(&self, event: &ServiceEvent) -> MonitorResult {
        self.transition(ServiceEventKind::Registered, event)
    }

    fn service_starting(&self, event: &ServiceEvent) -> MonitorResult {
        self.transition(ServiceEventKind::Starting, event)
    }

    fn service_waiting_to_start(&self, event: &ServiceEvent) -> MonitorResult {
        let waiting: Vec<String> = event.unsatisfied_conditions().iter().map(|c| format!("{:?}", c)).collect();
        if self.verbose {
            info!("Service '{}' is waiting to start on [{}]", event.service_name(), waiting.join(", "));
        } else {
            debug!("Service '{}' is waiting to start on [{}]", event.service_name(), waiting.join(", "));
        }
        Ok(())
    }

    fn service_start_error(&self, event: &ServiceEvent) -> MonitorResult {
        match event.cause() {
            Some(cause) => warn!("Service '{}' failed to start: {}", event.service_name(), cause),
            None => warn!("Service '{}' failed to start", event.service_name()),
        }
        Ok(())
    }

    fn service_running(&self, event: &ServiceEvent) -> MonitorResult {
        self.transition(ServiceEventKind::Running, event)
    }

    fn service_stopping(&self, event: &ServiceEvent) -> MonitorResult {
        self.transition(ServiceEventKind::Stopping, event)
    }

    fn service_waiting_to_stop(&self, event: &ServiceEvent) -> MonitorResult {
        let waiting: Vec<String> = event.unsatisfied_conditions().iter().map(|c| format!("{:?}", c)).collect();
        if self.verbose {
            info!("Service '{}' is waiting to stop on [{}]", event.service_name(), waiting.join(", "));
        } else {
            debug!("Service '{}' is waiting to stop on [{}]", event.service_name(), waiting.join(", "));
        }
        Ok(())
    }

    fn service_stop_error(&self, event: &ServiceEvent) -> MonitorResult {
        match event.cause() {
            Some(cause) => warn!("Error while stopping service '{}': {}", event.service_name(), cause),
            None => warn!("Error while stopping service '{}'", event.service_name()),
        }
        Ok(())
    }

    fn service_stopped(&self, event: &ServiceEvent) -> MonitorResult {
        self.transition(ServiceEventKind::Stopped, event)
    }

    fn service_unregistered(&self, event: &ServiceEvent) -> MonitorResult {
        self.transition(ServiceEventKind::Unregistered, event)
    }
}

/// Default kernel monitor: logs monitor failures and carries on.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingKernelMonitor;

impl KernelMonitor for LoggingKernelMonitor {
    fn service_notification_error(
        &self,
        _monitor: &Arc<dyn ServiceMonitor>,
        kind: ServiceEventKind,
        event: &ServiceEvent,
        error: &Error,
    ) -> MonitorResult {
        warn!(
            "Monitor failed on {} (event {}) for service '{}': {}",
            kind,
            event.event_id(),
            event.service_name(),
            error
        );
        Ok(())
    }
}
