#[cfg(test)]
mod registry_tests;
#[cfg(test)]
mod types_tests;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::kernel::{KernelConfig, StandaloneKernel};
use crate::monitor::{MonitorResult, ServiceEvent, ServiceEventKind, ServiceMonitor};
use crate::service::{ServiceInstance, ServiceName, ServiceState, SimpleServiceFactory};

/// Value produced by the test factories.
#[derive(Debug)]
struct Widget(usize);

fn test_kernel() -> StandaloneKernel {
    StandaloneKernel::new(
        KernelConfig::named("test")
            .with_lock_timeout(Duration::from_secs(5))
            .with_condition_wait(Duration::from_millis(50)),
    )
}

/// Factory counting how many instances it created and destroyed.
fn counting_factory(created: &Arc<AtomicUsize>, destroyed: &Arc<AtomicUsize>) -> SimpleServiceFactory {
    let created = Arc::clone(created);
    let destroyed = Arc::clone(destroyed);
    SimpleServiceFactory::new(move |_| {
        let n = created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ServiceInstance::new(Widget(n)))
    })
    .on_destroy(move |_, _| {
        destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
}

/// Poll until `name` reaches `state`, panicking after a few seconds.
fn wait_for_state(kernel: &StandaloneKernel, name: &ServiceName, state: ServiceState) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while kernel.service_state(name).ok() != Some(state) {
        assert!(Instant::now() < deadline, "service {} never reached {}", name, state);
        thread::sleep(Duration::from_millis(5));
    }
}

/// Records every event it sees as `(kind, service name)`.
#[derive(Default)]
struct RecordingMonitor {
    events: Mutex<Vec<(ServiceEventKind, ServiceName)>>,
}

impl RecordingMonitor {
    fn record(&self, kind: ServiceEventKind, event: &ServiceEvent) -> MonitorResult {
        self.events.lock().push((kind, event.service_name().clone()));
        Ok(())
    }

    fn kinds_for(&self, name: &str) -> Vec<ServiceEventKind> {
        self.events
            .lock()
            .iter()
            .filter(|(_, service)| service.as_str() == name)
            .map(|(kind, _)| *kind)
            .collect()
    }
}

impl ServiceMonitor for RecordingMonitor {
    fn service_registered(&self, event: &ServiceEvent) -> MonitorResult {
        self.record(ServiceEventKind::Registered, event)
    }

    fn service_starting(&self, event: &ServiceEvent) -> MonitorResult {
        self.record(ServiceEventKind::Starting, event)
    }

    fn service_waiting_to_start(&self, event: &ServiceEvent) -> MonitorResult {
        self.record(ServiceEventKind::WaitingToStart, event)
    }

    fn service_start_error(&self, event: &ServiceEvent) -> MonitorResult {
        self.record(ServiceEventKind::StartError, event)
    }

    fn service_running(&self, event: &ServiceEvent) -> MonitorResult {
        self.record(ServiceEventKind::Running, event)
    }

    fn service_stopping(&self, event: &ServiceEvent) -> MonitorResult {
        self.record(ServiceEventKind::Stopping, event)
    }

    fn service_waiting_to_stop(&self, event: &ServiceEvent) -> MonitorResult {
        self.record(ServiceEventKind::WaitingToStop, event)
    }

    fn service_stop_error(&self, event: &ServiceEvent) -> MonitorResult {
        self.record(ServiceEventKind::StopError, event)
    }

    fn service_stopped(&self, event: &ServiceEvent) -> MonitorResult {
        self.record(ServiceEventKind::Stopped, event)
    }

    fn service_unregistered(&self, event: &ServiceEvent) -> MonitorResult {
        self.record(ServiceEventKind::Unregistered, event)
    }
}
