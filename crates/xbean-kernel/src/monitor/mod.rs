//! # Service Monitoring
//!
//! Lifecycle notifications. Every transition of every service produces a
//! [`ServiceEvent`], delivered to [`ServiceMonitor`]s through the
//! [`ServiceMonitorBroadcaster`]. A monitor that fails is reported to the
//! kernel's single [`KernelMonitor`] and never disturbs the transition that
//! fired the event.
pub mod broadcaster;
pub mod log;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::kernel::error::{BoxError, Error};
use crate::kernel::standalone::KernelRef;
use crate::service::condition::ServiceCondition;
use crate::service::factory::ServiceFactory;
use crate::service::types::{ServiceInstance, ServiceName};

pub use broadcaster::ServiceMonitorBroadcaster;
pub use log::{LoggingKernelMonitor, LoggingServiceMonitor};

/// What a monitor callback returns; failures are isolated by the broadcaster.
pub type MonitorResult = std::result::Result<(), BoxError>;

/// The kind of lifecycle notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceEventKind {
    Registered,
    Starting,
    WaitingToStart,
    StartError,
    Running,
    Stopping,
    WaitingToStop,
    StopError,
    Stopped,
    Unregistered,
}

impl ServiceEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceEventKind::Registered => "serviceRegistered",
            ServiceEventKind::Starting => "serviceStarting",
            ServiceEventKind::WaitingToStart => "serviceWaitingToStart",
            ServiceEventKind::StartError => "serviceStartError",
            ServiceEventKind::Running => "serviceRunning",
            ServiceEventKind::Stopping => "serviceStopping",
            ServiceEventKind::WaitingToStop => "serviceWaitingToStop",
            ServiceEventKind::StopError => "serviceStopError",
            ServiceEventKind::Stopped => "serviceStopped",
            ServiceEventKind::Unregistered => "serviceUnregistered",
        }
    }
}

impl fmt::Display for ServiceEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of one lifecycle notification.
#[derive(Clone)]
pub struct ServiceEvent {
    event_id: u64,
    kernel: KernelRef,
    service_name: ServiceName,
    service_factory: Arc<dyn ServiceFactory>,
    service: Option<ServiceInstance>,
    cause: Option<Error>,
    unsatisfied_conditions: Vec<Arc<dyn ServiceCondition>>,
}

impl ServiceEvent {
    pub fn new(
        event_id: u64,
        kernel: KernelRef,
        service_name: ServiceName,
        service_factory: Arc<dyn ServiceFactory>,
        service: Option<ServiceInstance>,
    ) -> Self {
        Self {
            event_id,
            kernel,
            service_name,
            service_factory,
            service,
            cause: None,
            unsatisfied_conditions: Vec::new(),
        }
    }

    pub fn with_cause(mut self, cause: Error) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn with_unsatisfied_conditions(mut self, conditions: Vec<Arc<dyn ServiceCondition>>) -> Self {
        self.unsatisfied_conditions = conditions;
        self
    }

    pub fn event_id(&self) -> u64 {
        self.event_id
    }

    pub fn kernel(&self) -> &KernelRef {
        &self.kernel
    }

    pub fn service_name(&self) -> &ServiceName {
        &self.service_name
    }

    pub fn service_factory(&self) -> &Arc<dyn ServiceFactory> {
        &self.service_factory
    }

    pub fn service(&self) -> Option<&ServiceInstance> {
        self.service.as_ref()
    }

    pub fn cause(&self) -> Option<&Error> {
        self.cause.as_ref()
    }

    pub fn unsatisfied_conditions(&self) -> &[Arc<dyn ServiceCondition>] {
        &self.unsatisfied_conditions
    }
}

impl fmt::Debug for ServiceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceEvent")
            .field("event_id", &self.event_id)
            .field("service_name", &self.service_name)
            .field("service", &self.service)
            .field("cause", &self.cause)
            .field("unsatisfied_conditions", &self.unsatisfied_conditions)
            .finish()
    }
}

/// Source of kernel-wide event ids.
#[derive(Debug, Default)]
pub struct EventIdGenerator(AtomicU64);

impl EventIdGenerator {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn next_id(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Passive sink for lifecycle notifications. Every method defaults to a no-op.
pub trait ServiceMonitor: Send + Sync {
    fn service_registered(&self, _event: &ServiceEvent) -> MonitorResult {
        Ok(())
    }

    fn service_starting(&self, _event: &ServiceEvent) -> MonitorResult {
        Ok(())
    }

    fn service_waiting_to_start(&self, _event: &ServiceEvent) -> MonitorResult {
        Ok(())
    }

    fn service_start_error(&self, _event: &ServiceEvent) -> MonitorResult {
        Ok(())
    }

    fn service_running(&self, _event: &ServiceEvent) -> MonitorResult {
        Ok(())
    }

    fn service_stopping(&self, _event: &ServiceEvent) -> MonitorResult {
        Ok(())
    }

    fn service_waiting_to_stop(&self, _event: &ServiceEvent) -> MonitorResult {
        Ok(())
    }

    fn service_stop_error(&self, _event: &ServiceEvent) -> MonitorResult {
        Ok(())
    }

    fn service_stopped(&self, _event: &ServiceEvent) -> MonitorResult {
        Ok(())
    }

    fn service_unregistered(&self, _event: &ServiceEvent) -> MonitorResult {
        Ok(())
    }
}

/// Route one event to the matching [`ServiceMonitor`] method.
pub fn dispatch(monitor: &dyn ServiceMonitor, kind: ServiceEventKind, event: &ServiceEvent) -> MonitorResult {
    match kind {
        ServiceEventKind::Registered => monitor.service_registered(event),
        ServiceEventKind::Starting => monitor.service_starting(event),
        ServiceEventKind::WaitingToStart => monitor.service_waiting_to_start(event),
        ServiceEventKind::StartError => monitor.service_start_error(event),
        ServiceEventKind::Running => monitor.service_running(event),
        ServiceEventKind::Stopping => monitor.service_stopping(event),
        ServiceEventKind::WaitingToStop => monitor.service_waiting_to_stop(event),
        ServiceEventKind::StopError => monitor.service_stop_error(event),
        ServiceEventKind::Stopped => monitor.service_stopped(event),
        ServiceEventKind::Unregistered => monitor.service_unregistered(event),
    }
}

/// Receives failures of [`ServiceMonitor`]s.
pub trait KernelMonitor: Send + Sync {
    fn service_notification_error(
        &self,
        monitor: &Arc<dyn ServiceMonitor>,
        kind: ServiceEventKind,
        event: &ServiceEvent,
        error: &Error,
    ) -> MonitorResult;
}

pub(crate) fn same_monitor(a: &Arc<dyn ServiceMonitor>, b: &Arc<dyn ServiceMonitor>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}
